use std::path::PathBuf;

use crate::config::Config;
use crate::git::clone_url;
use crate::hosting::RepositoryRecord;
use crate::paths::Paths;

/// One changed repository on its way to the drive.
///
/// The clone directory is not part of the job: it is acquired and released
/// around the archive step (see [`super::cleanup::WorkingCopy`]).
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub record: RepositoryRecord,
    pub url: String,
    pub archive_path: PathBuf,
    /// Drive path relative to the configured folder, `<owner>/<name>.tar.gz`.
    pub remote_name: String,
}

/// Build archive jobs for the change set.
///
/// Archives are laid out as `<work>/archives/<owner>/<name>.tar.gz`, so two
/// owners with equally named repositories never collide.
pub fn build_jobs(changed: &[RepositoryRecord], cfg: &Config, p: &Paths) -> Vec<ArchiveJob> {
    let archives = p.archives();
    changed
        .iter()
        .map(|r| {
            let remote_name = format!("{}/{}.tar.gz", r.owner, r.name());
            ArchiveJob {
                record: r.clone(),
                url: clone_url(&cfg.github.clone_url, &r.full_name),
                archive_path: archives.join(&r.owner).join(format!("{}.tar.gz", r.name())),
                remote_name,
            }
        })
        .collect()
}
