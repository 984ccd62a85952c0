//! Cloud-storage side: tokens, upload sessions and chunked transfer.

mod auth;
mod chunked;
mod retry;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::Client;

use crate::config::GraphAuth;
use crate::error::UploadError;

pub use auth::{ClientCredentials, TokenSource};
pub use chunked::{ChunkedUploader, UploadOutcome, UploadState, content_range};
pub use retry::{RetryPolicy, retry_after};
pub use session::{DriveLocation, UploadSession, create_session};

/// A hung upload stalls one worker; this bounds how long.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything needed to push one local archive to the drive.
///
/// Shared by reference across upload workers.
pub struct ArchiveUploader {
    client: Client,
    tokens: Arc<dyn TokenSource>,
    drive: DriveLocation,
    chunks: ChunkedUploader,
}

impl ArchiveUploader {
    pub fn new(
        client: Client,
        tokens: Arc<dyn TokenSource>,
        drive: DriveLocation,
        chunk_size: u64,
        policy: RetryPolicy,
    ) -> Self {
        let chunks = ChunkedUploader::new(client.clone(), chunk_size, policy);
        Self {
            client,
            tokens,
            drive,
            chunks,
        }
    }

    /// Wire up the client-credentials token source and drive from config.
    pub fn from_config(graph: &GraphAuth, chunk_size: u64, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let tokens = Arc::new(ClientCredentials::new(
            client.clone(),
            &graph.login_url,
            &graph.tenant_id,
            &graph.client_id,
            &graph.client_secret,
        ));
        let drive = DriveLocation {
            api_url: graph.api_url.clone(),
            site: graph.site.clone(),
            site_id: graph.site_id.clone(),
            folder: graph.folder.clone(),
        };
        Ok(Self::new(client, tokens, drive, chunk_size, policy))
    }

    /// Open a session for `remote_name` and stream `local` through it.
    pub fn upload(
        &self,
        local: &Path,
        remote_name: &str,
        on_progress: impl FnMut(u64),
    ) -> Result<UploadOutcome, UploadError> {
        let session = create_session(&self.client, self.tokens.as_ref(), &self.drive, remote_name)?;
        self.chunks.upload_file(&session, local, on_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn upload_opens_session_then_sends_chunks() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/login/t/oauth2/v2.0/token");
            then.status(200)
                .json_body(json!({"access_token": "tok", "expires_in": 3600}));
        });
        let upload_url = server.url("/upload/abc");
        let session = server.mock(|when, then| {
            when.method(POST)
                .path("/v1.0/sites/s1/root:/bk/acme/a.tar.gz:/createUploadSession")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!({
                "uploadUrl": upload_url,
                "expirationDateTime": "2030-01-01T00:00:00Z",
                "nextExpectedRanges": ["0-"]
            }));
        });
        let put = server.mock(|when, then| {
            when.method(PUT)
                .path("/upload/abc")
                .header("Content-Range", "bytes 0-4/5");
            then.status(201).json_body(json!({"id": "i"}));
        });

        let graph = GraphAuth {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "s".into(),
            site: "sites".into(),
            site_id: "s1".into(),
            folder: "bk".into(),
            api_url: server.url("/v1.0"),
            login_url: server.url("/login"),
        };
        let td = tempfile::tempdir().unwrap();
        let local = td.path().join("a.tar.gz");
        std::fs::write(&local, b"hello").unwrap();

        let policy = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        let up = ArchiveUploader::from_config(&graph, 1024, policy).unwrap();
        let out = up.upload(&local, "acme/a.tar.gz", |_| {}).unwrap();
        token.assert();
        session.assert();
        put.assert();
        assert_eq!(out.state, UploadState::Completed);
    }
}
