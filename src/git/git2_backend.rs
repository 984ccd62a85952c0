use anyhow::{Context, Result};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository, build::RepoBuilder};
use std::path::Path;

/// Basic-auth style credentials for HTTPS clones.
#[derive(Clone)]
pub struct GitCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Build a `FetchOptions` that answers credential prompts with `creds`.
///
/// libgit2 keeps asking as long as the callback keeps returning credentials,
/// so a second prompt for the same URL is treated as a rejection.
fn fetch_opts_with_creds(creds: &GitCredentials) -> FetchOptions<'_> {
    let mut attempted = false;
    let mut cb = RemoteCallbacks::new();
    cb.credentials(move |_url, username_from_url, _allowed| {
        if attempted {
            return Err(git2::Error::from_str("credentials rejected"));
        }
        attempted = true;
        let user = if creds.username.is_empty() {
            username_from_url.unwrap_or("git")
        } else {
            creds.username.as_str()
        };
        Cred::userpass_plaintext(user, &creds.token)
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(cb);
    fo
}

/// `<base>/<owner>/<name>.git`
pub fn clone_url(base: &str, full_name: &str) -> String {
    format!("{}/{}.git", base.trim_end_matches('/'), full_name)
}

/// Clone a full working copy of `url` into `dest`.
///
/// `dest` must not exist or must be an empty directory.
///
/// # Errors
/// Returns an error if the transport, authentication or checkout fails.
pub fn clone_repo(url: &str, dest: &Path, creds: &GitCredentials) -> Result<Repository> {
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_opts_with_creds(creds));
    builder
        .clone(url, dest)
        .with_context(|| format!("git clone {}", url))
}
