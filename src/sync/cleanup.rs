use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A repository clone that lives exactly as long as its archive step.
///
/// The directory is removed when the value is dropped; [`WorkingCopy::release`]
/// does the same but reports the error instead of swallowing it.
pub struct WorkingCopy {
    dir: TempDir,
}

impl WorkingCopy {
    /// Create an empty directory for `full_name` under `root`.
    pub fn acquire(root: &Path, full_name: &str) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("cannot create {}", root.display()))?;
        let prefix = format!("{}-", full_name.replace('/', "__"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .with_context(|| format!("cannot create working copy in {}", root.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn release(self) -> Result<()> {
        let shown = self.dir.path().display().to_string();
        self.dir
            .close()
            .with_context(|| format!("cannot remove {}", shown))
    }
}

/// Delete an uploaded (or abandoned) archive. Failures are logged, not raised.
pub fn remove_archive(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!("cannot delete {}: {}", path.display(), e);
        return;
    }
    // Drop the per-owner directory once it is empty; ignore "not empty".
    if let Some(parent) = path.parent() {
        let _ = fs::remove_dir(parent);
    }
}

/// Remove clone directories left behind by an interrupted run.
///
/// Returns how many entries were removed.
pub fn sweep_stale_clones(clones_dir: &Path) -> usize {
    let rd = match fs::read_dir(clones_dir) {
        Ok(rd) => rd,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for ent in rd.flatten() {
        let path = ent.path();
        let res = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match res {
            Ok(_) => {
                tracing::info!("removed stale clone {}", path.display());
                removed += 1;
            }
            Err(e) => tracing::warn!("cannot remove stale clone {}: {}", path.display(), e),
        }
    }
    removed
}
