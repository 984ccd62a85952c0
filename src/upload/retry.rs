//! Backoff between chunk re-sends: exponential with jitter, unless the
//! server names its own wait through `Retry-After`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Re-sends allowed per chunk before the transfer fails.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Cap for both the computed backoff and a server-requested wait.
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the backoff (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(cfg: &Config) -> Self {
        Self {
            max_retries: cfg.chunk_retries,
            base_delay_ms: cfg.chunk_retry_delay_ms,
            max_delay_ms: cfg.chunk_retry_max_delay_ms,
            ..Default::default()
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-send number `attempt + 1`: `base * 2^attempt`,
    /// capped at `max_delay_ms`, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let capped = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        let jitter_range = (capped as f64 * self.jitter) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }

    /// The server's `Retry-After` wins over the computed backoff.
    pub fn wait(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(d) => d.min(Duration::from_millis(self.max_delay_ms)),
            None => self.backoff(attempt),
        }
    }
}

/// `Retry-After` in either of its forms: delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
