use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use super::{RepositoryRecord, ZERO_TIME, owner_of};

const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct RepoItem {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<Signature>,
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

/// Thin client over the GitHub REST API.
///
/// Holds its own token in the default headers; nothing is process-global.
pub struct GitHubClient {
    client: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("rvault-backup"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Every repository visible to the token, as `owner/name`.
    ///
    /// Pages through `/user/repos` until an empty page comes back.
    pub fn list_repositories(&self) -> Result<Vec<String>> {
        let url = format!("{}/user/repos", self.api_url);
        let mut names = Vec::new();
        for page in 1.. {
            let items: Vec<RepoItem> = self
                .client
                .get(&url)
                .query(&[("per_page", PER_PAGE), ("page", page)])
                .send()
                .with_context(|| format!("GET {} page {}", url, page))?
                .error_for_status()
                .with_context(|| format!("listing repositories (page {})", page))?
                .json()
                .context("decoding repository page")?;
            if items.is_empty() {
                break;
            }
            names.extend(items.into_iter().map(|r| r.full_name));
        }
        Ok(names)
    }

    /// Committer date of the newest commit on the default branch, falling
    /// back to the author date.
    ///
    /// The committer date moves on rebase and cherry-pick; the author date
    /// does not. An empty repository yields [`ZERO_TIME`].
    pub fn latest_commit_time(&self, full_name: &str) -> Result<DateTime<Utc>> {
        let url = format!("{}/repos/{}/commits", self.api_url, full_name);
        let resp = self
            .client
            .get(&url)
            .query(&[("per_page", 1)])
            .send()
            .with_context(|| format!("GET {}", url))?;
        // 409 "Git Repository is empty"
        if resp.status() == StatusCode::CONFLICT {
            return Ok(ZERO_TIME);
        }
        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        let commits: Vec<CommitItem> = resp.json().context("decoding commit list")?;
        let Some(first) = commits.into_iter().next() else {
            return Ok(ZERO_TIME);
        };
        let sig = first
            .commit
            .committer
            .or(first.commit.author)
            .context("commit has neither author nor committer")?;
        Ok(sig.date)
    }

    /// Listing plus timestamps for the repositories passing `owners`.
    ///
    /// A timestamp that cannot be fetched is logged and replaced by
    /// [`ZERO_TIME`], so that repository is simply not considered changed.
    pub fn fetch_records(&self, owners: &[String]) -> Result<Vec<RepositoryRecord>> {
        let names = self.list_repositories()?;
        tracing::info!("{} repositories visible", names.len());
        let records = names
            .into_iter()
            .filter(|n| owners.is_empty() || owners.iter().any(|o| o == owner_of(n)))
            .map(|name| {
                let ts = self.latest_commit_time(&name).unwrap_or_else(|e| {
                    tracing::warn!("skipping {}: cannot read last commit: {:#}", name, e);
                    ZERO_TIME
                });
                RepositoryRecord::new(name, ts)
            })
            .collect();
        Ok(records)
    }
}
