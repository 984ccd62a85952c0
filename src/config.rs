use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::{Paths, paths};

/// Byte-range uploads must be cut on multiples of this block size.
pub const UPLOAD_BLOCK_SIZE: u64 = 320 * 1024;

/// Top-level configuration loaded from `config.toml`.
///
/// Example TOML:
/// ```toml
/// owners = ["my-org"]
/// upload_concurrency = 4
///
/// [github]
/// username = "octocat"
/// token    = "ghp_xxx"
///
/// [graph]
/// tenant_id     = "..."
/// client_id     = "..."
/// client_secret = "..."
/// site_id       = "contoso.sharepoint.com,..."
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Organisation allow-list. Empty means every accessible repository.
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default = "default_clone_concurrency")]
    pub clone_concurrency: usize,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_chunk_retries")]
    pub chunk_retries: u32,
    /// First re-send waits this long; each further one doubles it.
    #[serde(default = "default_chunk_retry_delay_ms")]
    pub chunk_retry_delay_ms: u64,
    #[serde(default = "default_chunk_retry_max_delay_ms")]
    pub chunk_retry_max_delay_ms: u64,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    pub github: GitHubAuth,
    pub graph: GraphAuth,
}

/// Credentials and endpoints for the source-hosting side.
#[derive(Debug, Deserialize, Clone)]
pub struct GitHubAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_clone_url")]
    pub clone_url: String,
}

/// App registration and drive location for the upload side.
#[derive(Debug, Deserialize, Clone)]
pub struct GraphAuth {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default = "default_graph_api")]
    pub api_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
}

fn default_clone_concurrency() -> usize {
    1
}

fn default_upload_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_chunk_size() -> u64 {
    10 * UPLOAD_BLOCK_SIZE
}

fn default_chunk_retries() -> u32 {
    2
}

fn default_chunk_retry_delay_ms() -> u64 {
    1000
}

fn default_chunk_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_clone_url() -> String {
    "https://github.com".to_string()
}

fn default_site() -> String {
    "sites".to_string()
}

fn default_graph_api() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_login_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

impl Config {
    /// Parse a config document without touching the filesystem.
    pub fn from_toml(txt: &str) -> Result<Config> {
        let cfg: Config = toml::from_str(txt).context("failed to parse config.toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make a run misbehave halfway through.
    ///
    /// # Errors
    /// - a concurrency limit of zero
    /// - `chunk_size` that is zero or not a multiple of [`UPLOAD_BLOCK_SIZE`]
    /// - a retry delay cap below the initial retry delay
    /// - missing credentials on either side
    pub fn validate(&self) -> Result<()> {
        if self.clone_concurrency == 0 {
            bail!("clone_concurrency must be at least 1");
        }
        if self.upload_concurrency == 0 {
            bail!("upload_concurrency must be at least 1");
        }
        if self.chunk_size == 0 || self.chunk_size % UPLOAD_BLOCK_SIZE != 0 {
            bail!(
                "chunk_size {} must be a positive multiple of {}",
                self.chunk_size,
                UPLOAD_BLOCK_SIZE
            );
        }
        if self.chunk_retry_max_delay_ms < self.chunk_retry_delay_ms {
            bail!(
                "chunk_retry_max_delay_ms ({}) is below chunk_retry_delay_ms ({})",
                self.chunk_retry_max_delay_ms,
                self.chunk_retry_delay_ms
            );
        }
        if self.github.token.trim().is_empty() {
            bail!("github.token is empty");
        }
        let g = &self.graph;
        for (key, val) in [
            ("graph.tenant_id", &g.tenant_id),
            ("graph.client_id", &g.client_id),
            ("graph.client_secret", &g.client_secret),
            ("graph.site_id", &g.site_id),
        ] {
            if val.trim().is_empty() {
                bail!("{} is empty", key);
            }
        }
        Ok(())
    }
}

/// Load, parse and validate the config file at `path`.
///
/// # Errors
/// - Returns an error if the file cannot be read.
/// - Returns an error if parsing or validation fails.
pub fn load_config(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path)
        .with_context(|| format!("config not found: {}", path.display()))?;
    Config::from_toml(&txt)
}

/// Load the config (from `config_path`, or the default under the rvault
/// home) together with the paths it resolves to.
pub fn load_context(config_path: Option<&Path>) -> Result<(Config, Paths)> {
    let p = paths()?;
    let cfg = load_config(config_path.unwrap_or(p.config.as_path()))?;
    let p = p.with_overrides(cfg.state_file.as_ref(), cfg.work_dir.as_ref());
    Ok((cfg, p))
}
