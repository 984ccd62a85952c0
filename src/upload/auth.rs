//! Bearer tokens for the storage API.
//!
//! Tokens are owned by an explicit [`TokenSource`] handed to every call that
//! needs one. [`ClientCredentials`] caches the current token and fetches a
//! new one once it is within [`REFRESH_MARGIN_SECS`] of expiring.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::UploadError;

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Refresh this many seconds before the server-side expiry.
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub trait TokenSource: Send + Sync {
    /// A token valid for at least [`REFRESH_MARGIN_SECS`].
    fn bearer(&self) -> Result<String, UploadError>;

    /// Drop any cached token, e.g. after the server answered 401.
    fn invalidate(&self);
}

#[derive(Debug, Clone)]
struct CachedToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// OAuth2 client-credentials grant against `<login_url>/<tenant>/oauth2/v2.0/token`.
pub struct ClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        client: Client,
        login_url: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                login_url.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: GRAPH_SCOPE.to_string(),
            cache: Mutex::new(None),
        }
    }

    fn fetch(&self) -> Result<CachedToken, UploadError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(UploadError::Token {
                status: status.as_u16(),
                body,
            });
        }
        let tok: TokenResponse = serde_json::from_str(&body)?;
        tracing::debug!("fetched storage token valid for {}s", tok.expires_in);
        Ok(CachedToken {
            secret: tok.access_token,
            expires_at: Utc::now() + Duration::seconds(tok.expires_in),
        })
    }
}

impl TokenSource for ClientCredentials {
    fn bearer(&self) -> Result<String, UploadError> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tok) = cache.as_ref()
            && tok.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now()
        {
            return Ok(tok.secret.clone());
        }
        let fresh = self.fetch()?;
        let secret = fresh.secret.clone();
        *cache = Some(fresh);
        Ok(secret)
    }

    fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Fixed token, for tests that do not exercise the grant.
#[cfg(test)]
pub(crate) struct StaticToken(pub String);

#[cfg(test)]
impl TokenSource for StaticToken {
    fn bearer(&self) -> Result<String, UploadError> {
        Ok(self.0.clone())
    }

    fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn creds(server: &MockServer) -> ClientCredentials {
        ClientCredentials::new(Client::new(), &server.base_url(), "tenant-1", "cid", "secret")
    }

    #[test]
    fn token_is_cached_until_near_expiry() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/tenant-1/oauth2/v2.0/token")
                .x_www_form_urlencoded_tuple("grant_type", "client_credentials")
                .x_www_form_urlencoded_tuple("client_id", "cid");
            then.status(200)
                .json_body(json!({"access_token": "abc", "expires_in": 3600, "token_type": "Bearer"}));
        });
        let c = creds(&server);
        assert_eq!(c.bearer().unwrap(), "abc");
        assert_eq!(c.bearer().unwrap(), "abc");
        m.assert_hits(1);
    }

    #[test]
    fn short_lived_token_is_refreshed() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/tenant-1/oauth2/v2.0/token");
            then.status(200)
                .json_body(json!({"access_token": "abc", "expires_in": 30}));
        });
        let c = creds(&server);
        c.bearer().unwrap();
        c.bearer().unwrap();
        m.assert_hits(2);
    }

    #[test]
    fn invalidate_forces_refetch() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/tenant-1/oauth2/v2.0/token");
            then.status(200)
                .json_body(json!({"access_token": "abc", "expires_in": 3600}));
        });
        let c = creds(&server);
        c.bearer().unwrap();
        c.invalidate();
        c.bearer().unwrap();
        m.assert_hits(2);
    }

    #[test]
    fn rejected_credentials_surface_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/tenant-1/oauth2/v2.0/token");
            then.status(401).body("invalid_client");
        });
        match creds(&server).bearer() {
            Err(UploadError::Token { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid_client");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
