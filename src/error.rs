//! Error types for the upload side.
//!
//! Everything above the upload protocol uses `anyhow`; the protocol itself
//! keeps a typed error so callers can tell a rejected session from a
//! rejected chunk and report the offset a transfer stopped at.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// Reading the local file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint refused the client credentials.
    #[error("token request failed ({status}): {body}")]
    Token { status: u16, body: String },

    /// The remote refused to open an upload session for the target path.
    #[error("upload session rejected ({status}): {body}")]
    SessionRejected { status: u16, body: String },

    /// A chunk kept failing after all re-sends.
    #[error("chunk at offset {offset} rejected ({status}): {body}")]
    ChunkRejected {
        offset: u64,
        status: u16,
        body: String,
    },

    /// The server asked for a byte range we never sent.
    #[error("server expects offset {reported}, but only {expected} bytes were sent")]
    RangeMismatch { expected: u64, reported: u64 },

    /// Every byte was sent but the server never acknowledged the object.
    #[error("upload of {total} bytes was not finalized by the server")]
    NotFinalized { total: u64 },

    #[error("upload session expired at {expired_at}")]
    SessionExpired { expired_at: DateTime<Utc> },

    #[error("{path} is empty; nothing to upload")]
    EmptyFile { path: PathBuf },

    #[error("invalid response JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> UploadError {
    UploadError::Io {
        path: path.into(),
        source,
    }
}
