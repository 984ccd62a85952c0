//! Directory → `.tar.gz` packing.
//!
//! The archive is assembled in `<dest>.partial` and only renamed into place
//! once the tar trailer and the gzip trailer have both been written and the
//! file synced. Any failure removes the partial file; there is no recovery of
//! half-written archives.

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::HeaderMode;
use walkdir::WalkDir;

/// What ended up in a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
    pub sha256: String,
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(OsString::from(".partial"));
    PathBuf::from(name)
}

/// Pack every entry below `source` into a gzip-compressed tar at `dest`.
///
/// Entries are named relative to `source` and visited in file-name order,
/// so the same tree always yields the same entry sequence. Headers carry
/// size, mode, owner and mtime; symlinks are stored as links.
///
/// # Errors
/// - `source` is missing or not a directory
/// - `dest` (or its parent) cannot be created
/// - any entry cannot be read mid-walk
pub fn build_archive(source: &Path, dest: &Path) -> Result<ArchiveSummary> {
    let meta =
        fs::metadata(source).with_context(|| format!("cannot read {}", source.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", source.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let partial = partial_path(dest);
    let entries = match write_archive(source, &partial) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };
    fs::rename(&partial, dest).with_context(|| format!("cannot move archive to {}", dest.display()))?;

    Ok(ArchiveSummary {
        entries,
        bytes: fs::metadata(dest)?.len(),
        sha256: sha256_file(dest)?,
    })
}

fn write_archive(source: &Path, out: &Path) -> Result<usize> {
    let file = fs::File::create(out).with_context(|| format!("cannot create {}", out.display()))?;
    let gz = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(gz);
    tar.mode(HeaderMode::Complete);
    tar.follow_symlinks(false);

    let mut entries = 0;
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walking {}", source.display()))?;
        let rel = entry.path().strip_prefix(source)?;
        tar.append_path_with_name(entry.path(), rel)
            .with_context(|| format!("archiving {}", entry.path().display()))?;
        entries += 1;
    }

    // tar trailer, then gzip trailer, then make it durable.
    let gz = tar.into_inner().context("finishing tar stream")?;
    let file = gz.finish().context("finishing gzip stream")?;
    file.sync_all().context("syncing archive")?;
    Ok(entries)
}
