use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

use super::auth::TokenSource;
use crate::error::UploadError;

/// Where archives land: a drive root addressed as `<api>/<site>/<site_id>/root`.
#[derive(Debug, Clone)]
pub struct DriveLocation {
    pub api_url: String,
    /// `sites`, `users`, `groups` or `drives`
    pub site: String,
    pub site_id: String,
    /// Optional folder prefix below the drive root.
    pub folder: String,
}

impl DriveLocation {
    /// Drive path for `remote_name`, with the folder prefix applied.
    pub fn item_path(&self, remote_name: &str) -> String {
        let folder = self.folder.trim_matches('/');
        let name = remote_name.trim_start_matches('/');
        if folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", folder, name)
        }
    }

    pub fn session_url(&self, remote_name: &str) -> String {
        format!(
            "{}/{}/{}/root:/{}:/createUploadSession",
            self.api_url.trim_end_matches('/'),
            self.site,
            self.site_id,
            self.item_path(remote_name)
        )
    }
}

/// Server-issued context for one resumable upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

/// Open an upload session for `remote_name`, replacing any existing item.
///
/// A 401 drops the cached token and tries once more with a fresh one.
pub fn create_session(
    client: &Client,
    tokens: &dyn TokenSource,
    drive: &DriveLocation,
    remote_name: &str,
) -> Result<UploadSession, UploadError> {
    let url = drive.session_url(remote_name);
    let body = json!({ "item": { "@microsoft.graph.conflictBehavior": "replace" } });

    let mut retried = false;
    loop {
        let resp = client
            .post(&url)
            .bearer_auth(tokens.bearer()?)
            .json(&body)
            .send()?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED && !retried {
            tracing::debug!("session request unauthorized, refreshing token");
            tokens.invalidate();
            retried = true;
            continue;
        }
        let text = resp.text()?;
        if !status.is_success() {
            return Err(UploadError::SessionRejected {
                status: status.as_u16(),
                body: text,
            });
        }
        let session: UploadSession = serde_json::from_str(&text)?;
        tracing::debug!(
            "upload session for {} expires {:?}",
            remote_name,
            session.expiration_date_time
        );
        return Ok(session);
    }
}
