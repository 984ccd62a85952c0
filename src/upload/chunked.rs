//! Resumable byte-range upload against an open [`UploadSession`].
//!
//! Each request carries `Content-Range: bytes <a>-<b>/<total>`. Ranges are
//! strictly ascending and never overlap within one session. After every
//! interim (202) reply the server's `nextExpectedRanges` decides where the
//! next request starts; a chunk that was only partly taken is re-sent from
//! the reported offset. Before a failed chunk is re-sent the session status
//! is queried, so a chunk the server stored but whose reply was lost is not
//! sent twice.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_RANGE;
use serde::Deserialize;

use super::retry::{RetryPolicy, retry_after};
use super::session::UploadSession;
use crate::error::{UploadError, io_err};

/// Where a single transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    SessionRequested,
    Uploading { offset: u64 },
    Completed,
    Failed { offset: u64 },
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::SessionRequested => write!(f, "session requested"),
            UploadState::Uploading { offset } => write!(f, "uploading at {}", offset),
            UploadState::Completed => write!(f, "completed"),
            UploadState::Failed { offset } => write!(f, "failed at {}", offset),
        }
    }
}

/// Result of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub bytes: u64,
    pub requests: usize,
    /// Drive item id, when the final reply carried one.
    pub item_id: Option<String>,
    pub state: UploadState,
}

/// Body of a 202 reply and of a `GET uploadUrl` status query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatus {
    #[serde(default)]
    expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    next_expected_ranges: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FinalReply {
    id: Option<String>,
}

/// What one chunk request led to.
enum Step {
    Completed(Option<String>),
    /// The server now expects this offset, past the one just sent from.
    Advanced(u64),
    Retry {
        error: UploadError,
        wait: Option<Duration>,
        /// Ask the server where it stands before re-sending.
        resync: bool,
    },
}

/// Earliest start offset among ranges such as `"1024-"` or `"0-511"`.
fn next_expected_offset(ranges: &[String]) -> Option<u64> {
    ranges
        .iter()
        .filter_map(|r| r.split_once('-').map(|(start, _)| start.trim()))
        .filter_map(|s| s.parse::<u64>().ok())
        .min()
}

/// `bytes a-b/total` for a chunk of `len` bytes at `offset`.
pub fn content_range(offset: u64, len: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", offset, offset + len - 1, total)
}

fn read_chunk(file: &mut File, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, UploadError> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| io_err(path, e))?;
    let mut buf = Vec::with_capacity(len as usize);
    file.by_ref()
        .take(len)
        .read_to_end(&mut buf)
        .map_err(|e| io_err(path, e))?;
    if (buf.len() as u64) != len {
        return Err(io_err(
            path,
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "file shrank during upload"),
        ));
    }
    Ok(buf)
}

/// Drives one file through an upload session, one chunk at a time.
pub struct ChunkedUploader {
    client: Client,
    chunk_size: u64,
    policy: RetryPolicy,
}

impl ChunkedUploader {
    /// `chunk_size` must be non-zero; alignment to the service's block size
    /// is checked where it is configured.
    pub fn new(client: Client, chunk_size: u64, policy: RetryPolicy) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            policy,
        }
    }

    /// Send `path` through `session`, calling `on_progress` with the
    /// confirmed byte count after every accepted chunk.
    ///
    /// On failure the session is cancelled so the server can discard the
    /// partial object.
    pub fn upload_file(
        &self,
        session: &UploadSession,
        path: &Path,
        mut on_progress: impl FnMut(u64),
    ) -> Result<UploadOutcome, UploadError> {
        let mut file = File::open(path).map_err(|e| io_err(path, e))?;
        let total = file.metadata().map_err(|e| io_err(path, e))?.len();
        if total == 0 {
            return Err(UploadError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        let mut state = UploadState::SessionRequested;
        let mut requests = 0;
        let result = self.drive(
            session,
            path,
            &mut file,
            total,
            &mut state,
            &mut requests,
            &mut on_progress,
        );
        match result {
            Ok(item_id) => Ok(UploadOutcome {
                bytes: total,
                requests,
                item_id,
                state,
            }),
            Err(e) => {
                let offset = match state {
                    UploadState::Uploading { offset } => offset,
                    _ => 0,
                };
                state = UploadState::Failed { offset };
                tracing::warn!("{}: {} ({})", path.display(), state, e);
                self.cancel(session);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        session: &UploadSession,
        path: &Path,
        file: &mut File,
        total: u64,
        state: &mut UploadState,
        requests: &mut usize,
        on_progress: &mut impl FnMut(u64),
    ) -> Result<Option<String>, UploadError> {
        let mut offset = next_expected_offset(&session.next_expected_ranges).unwrap_or(0);
        if offset >= total {
            return Err(UploadError::RangeMismatch {
                expected: 0,
                reported: offset,
            });
        }
        let mut expires = session.expiration_date_time;
        let mut failures = 0u32;

        loop {
            *state = UploadState::Uploading { offset };
            if let Some(at) = expires
                && at <= Utc::now()
            {
                return Err(UploadError::SessionExpired { expired_at: at });
            }

            *requests += 1;
            let step = self.send_chunk(&session.upload_url, path, file, offset, total)?;
            match step {
                Step::Completed(item_id) => {
                    on_progress(total);
                    *state = UploadState::Completed;
                    return Ok(item_id);
                }
                Step::Advanced(next) => {
                    failures = 0;
                    on_progress(next);
                    offset = next;
                }
                Step::Retry {
                    error,
                    wait,
                    resync,
                } => {
                    if failures >= self.policy.max_retries {
                        return Err(error);
                    }
                    let delay = self.policy.wait(failures, wait);
                    failures += 1;
                    tracing::warn!(
                        "{}: chunk at {} failed ({}), re-sending in {}ms",
                        path.display(),
                        offset,
                        error,
                        delay.as_millis()
                    );
                    thread::sleep(delay);

                    if !resync {
                        continue;
                    }
                    let Some(status) = self.query_status(&session.upload_url) else {
                        continue;
                    };
                    if status.expiration_date_time.is_some() {
                        expires = status.expiration_date_time;
                    }
                    match next_expected_offset(&status.next_expected_ranges) {
                        Some(next) if next > total => {
                            return Err(UploadError::RangeMismatch {
                                expected: total,
                                reported: next,
                            });
                        }
                        Some(next) if next < total && next != offset => {
                            tracing::debug!(
                                "{}: server expects {} (was {})",
                                path.display(),
                                next,
                                offset
                            );
                            if next > offset {
                                failures = 0;
                                on_progress(next);
                            }
                            offset = next;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// PUT the chunk starting at `offset` and classify the reply.
    ///
    /// Only unrecoverable conditions come back as `Err`.
    fn send_chunk(
        &self,
        upload_url: &str,
        path: &Path,
        file: &mut File,
        offset: u64,
        total: u64,
    ) -> Result<Step, UploadError> {
        let len = self.chunk_size.min(total - offset);
        let sent_end = offset + len;
        let body = read_chunk(file, path, offset, len)?;
        let range = content_range(offset, len, total);
        tracing::debug!("{}: PUT {}", path.display(), range);

        let resp = match self
            .client
            .put(upload_url)
            .header(CONTENT_RANGE, &range)
            .body(body)
            .send()
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(Step::Retry {
                    error: UploadError::Http(e),
                    wait: None,
                    resync: true,
                });
            }
        };

        let status = resp.status();
        let wait = retry_after(resp.headers());
        let text = match resp.text() {
            Ok(t) => t,
            Err(e) => {
                return Ok(Step::Retry {
                    error: UploadError::Http(e),
                    wait,
                    resync: true,
                });
            }
        };

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                if sent_end != total {
                    return Err(UploadError::RangeMismatch {
                        expected: sent_end,
                        reported: total,
                    });
                }
                let item: FinalReply = serde_json::from_str(&text).unwrap_or_default();
                Ok(Step::Completed(item.id))
            }
            StatusCode::ACCEPTED => {
                let interim: SessionStatus = serde_json::from_str(&text).unwrap_or_default();
                let next = match next_expected_offset(&interim.next_expected_ranges) {
                    Some(n) => n,
                    None if sent_end < total => sent_end,
                    None => return Err(UploadError::NotFinalized { total }),
                };
                if next > sent_end || next > total {
                    return Err(UploadError::RangeMismatch {
                        expected: sent_end,
                        reported: next,
                    });
                }
                if next == total {
                    return Err(UploadError::NotFinalized { total });
                }
                if next <= offset {
                    return Ok(Step::Retry {
                        error: UploadError::ChunkRejected {
                            offset,
                            status: status.as_u16(),
                            body: text,
                        },
                        wait,
                        resync: false,
                    });
                }
                if next < sent_end {
                    tracing::debug!(
                        "{}: server took {} of {} bytes",
                        path.display(),
                        next - offset,
                        len
                    );
                }
                Ok(Step::Advanced(next))
            }
            _ => Ok(Step::Retry {
                error: UploadError::ChunkRejected {
                    offset,
                    status: status.as_u16(),
                    body: text,
                },
                wait,
                resync: true,
            }),
        }
    }

    /// `GET uploadUrl`: the server's view of the session, if it answers.
    fn query_status(&self, upload_url: &str) -> Option<SessionStatus> {
        let resp = match self.client.get(upload_url).send() {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!("session status query returned {}", r.status());
                return None;
            }
            Err(e) => {
                tracing::debug!("session status query failed: {}", e);
                return None;
            }
        };
        resp.json().ok()
    }

    /// Best-effort session cancel.
    fn cancel(&self, session: &UploadSession) {
        if let Err(e) = self.client.delete(&session.upload_url).send() {
            tracing::debug!("cancelling upload session failed: {}", e);
        }
    }
}
