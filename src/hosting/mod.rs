//! Source-hosting side: which repositories exist and when they last changed.

mod github;

use chrono::{DateTime, Utc};

pub use github::GitHubClient;

/// The "never modified" time. A repository with no commits carries it, and a
/// repository missing from the watermark is compared against it.
pub const ZERO_TIME: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// One repository as seen by the hosting API during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// `owner/name`
    pub full_name: String,
    pub owner: String,
    pub last_modified: DateTime<Utc>,
}

impl RepositoryRecord {
    pub fn new(full_name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        let full_name = full_name.into();
        let owner = owner_of(&full_name).to_string();
        Self {
            full_name,
            owner,
            last_modified,
        }
    }

    /// Repository name without the owner prefix.
    pub fn name(&self) -> &str {
        self.full_name
            .split_once('/')
            .map(|(_, n)| n)
            .unwrap_or(&self.full_name)
    }
}

/// Owner segment of an `owner/name` string.
pub fn owner_of(full_name: &str) -> &str {
    full_name.split('/').next().unwrap_or(full_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_splits_owner_and_name() {
        let r = RepositoryRecord::new("acme/widgets", ZERO_TIME);
        assert_eq!(r.owner, "acme");
        assert_eq!(r.name(), "widgets");
    }

    #[test]
    fn owner_of_without_slash_is_whole_string() {
        assert_eq!(owner_of("loner"), "loner");
    }
}
