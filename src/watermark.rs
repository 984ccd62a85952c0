//! Watermark store: last-processed commit time per repository.
//!
//! Persisted as a JSON array of `{"repo": ..., "time": <RFC3339>}` records.
//! Writes go to `<path>.tmp` and are renamed over the real file, so a crash
//! mid-write leaves the previous store intact.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory watermark: `owner/name` → last archived commit time.
pub type Watermark = HashMap<String, DateTime<Utc>>;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    #[serde(alias = "Repo")]
    repo: String,
    #[serde(alias = "Time")]
    time: DateTime<Utc>,
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Load the watermark at `path`.
///
/// A missing file yields an empty map. An unreadable or malformed file is an
/// error: silently starting from scratch would re-upload everything.
pub fn load(path: &Path) -> Result<Watermark> {
    if !path.exists() {
        return Ok(Watermark::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Watermark::new());
    }
    let entries: Vec<Entry> = serde_json::from_str(&contents)
        .with_context(|| format!("malformed watermark file {}", path.display()))?;
    Ok(entries.into_iter().map(|e| (e.repo, e.time)).collect())
}

/// Write the whole map to `path`, replacing the previous contents atomically.
///
/// Entries are sorted by repository name so the file diffs cleanly.
pub fn save(path: &Path, watermark: &Watermark) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let mut entries: Vec<Entry> = watermark
        .iter()
        .map(|(repo, time)| Entry {
            repo: repo.clone(),
            time: *time,
        })
        .collect();
    entries.sort_by(|a, b| a.repo.cmp(&b.repo));

    let json = serde_json::to_string_pretty(&entries)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json).with_context(|| format!("cannot write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("cannot replace {}", path.display()));
    }
    Ok(())
}
