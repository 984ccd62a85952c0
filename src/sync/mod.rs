mod cleanup;
mod jobs;
mod report;
mod resolve;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use rayon::prelude::*;
use std::path::Path;
use std::time::Duration;

use crate::archive::{ArchiveSummary, build_archive};
use crate::config::{Config, load_context};
use crate::git::{GitCredentials, clone_repo};
use crate::hosting::GitHubClient;
use crate::paths::Paths;
use crate::progress::{err_style, ok_style, spinner_style, upload_style};
use crate::upload::{ArchiveUploader, RetryPolicy};
use crate::watermark;

pub use cleanup::{WorkingCopy, remove_archive, sweep_stale_clones};
pub use jobs::{ArchiveJob, build_jobs};
pub use report::{Archived, Failure, RunReport, Stage};
pub use resolve::{is_changed, owner_allowed, resolve};

/// Back up every changed repository.
///
/// High-level flow:
/// 1. Load config and the watermark; list repositories and resolve the
///    change set (any failure here aborts the run).
/// 2. Clone and archive each changed repository on a pool of
///    `clone_concurrency` workers. Each clone lives in its own
///    [`WorkingCopy`] and is gone before the next step.
/// 3. Advance the watermark for every repository that was archived and
///    persist it.
/// 4. Upload archives on a pool of `upload_concurrency` workers, deleting
///    each local archive afterwards whatever the outcome.
///
/// Per-repository failures are collected in the returned [`RunReport`];
/// the remaining repositories carry on.
pub fn cmd_run(config_path: Option<&Path>, quiet: bool) -> Result<RunReport> {
    let (cfg, p) = load_context(config_path)?;
    run(&cfg, &p, quiet)
}

/// [`cmd_run`] on an already loaded config.
pub fn run(cfg: &Config, p: &Paths, quiet: bool) -> Result<RunReport> {
    let mut wm = watermark::load(&p.state)?;
    let uploader =
        ArchiveUploader::from_config(&cfg.graph, cfg.chunk_size, RetryPolicy::from(cfg))?;
    let hosting = GitHubClient::new(&cfg.github.api_url, &cfg.github.token)?;

    let records = hosting
        .fetch_records(&cfg.owners)
        .context("listing repositories")?;
    let changed = resolve(&records, &wm, &cfg.owners);
    let mut report = RunReport {
        considered: records.len(),
        changed: changed.len(),
        ..Default::default()
    };
    tracing::info!("{} of {} repositories changed", changed.len(), records.len());
    if changed.is_empty() {
        return Ok(report);
    }

    let mp = if quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };

    sweep_stale_clones(&p.clones());
    let jobs = build_jobs(&changed, cfg, p);
    let creds = GitCredentials {
        username: cfg.github.username.clone(),
        token: cfg.github.token.clone(),
    };

    let clone_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.clone_concurrency)
        .build()?;
    let archived: Vec<(&ArchiveJob, Result<ArchiveSummary, (Stage, anyhow::Error)>)> =
        clone_pool.install(|| {
            jobs.par_iter()
                .map(|job| (job, archive_one(job, &p.clones(), &creds, &mp)))
                .collect()
        });

    let mut to_upload = Vec::new();
    for (job, res) in archived {
        match res {
            Ok(summary) => {
                wm.insert(job.record.full_name.clone(), job.record.last_modified);
                report.archived.push(Archived {
                    repo: job.record.full_name.clone(),
                    summary,
                });
                to_upload.push(job);
            }
            Err((stage, e)) => {
                tracing::error!("{} failed at {}: {:#}", job.record.full_name, stage, e);
                report.fail(&job.record.full_name, stage, format!("{:#}", e));
            }
        }
    }

    if !to_upload.is_empty() {
        match watermark::save(&p.state, &wm) {
            Ok(()) => tracing::info!("watermark written to {}", p.state.display()),
            Err(e) => {
                tracing::error!("cannot persist watermark: {:#}", e);
                report.fail(p.state.display().to_string(), Stage::Watermark, format!("{:#}", e));
            }
        }
    }

    let upload_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.upload_concurrency)
        .build()?;
    let uploaded: Vec<(&ArchiveJob, Result<(), String>)> = upload_pool.install(|| {
        to_upload
            .par_iter()
            .map(|job| (*job, upload_one(job, &uploader, &mp)))
            .collect()
    });

    for (job, res) in uploaded {
        match res {
            Ok(()) => report.uploaded.push(job.record.full_name.clone()),
            Err(e) => report.fail(&job.record.full_name, Stage::Upload, e),
        }
    }

    Ok(report)
}

/// Clone `job` into a scoped working copy and archive it.
fn archive_one(
    job: &ArchiveJob,
    clones: &Path,
    creds: &GitCredentials,
    mp: &MultiProgress,
) -> Result<ArchiveSummary, (Stage, anyhow::Error)> {
    let name = &job.record.full_name;
    let pb = mp.add(ProgressBar::new_spinner());
    pb.set_style(spinner_style());
    pb.set_message(format!("cloning {}", name));
    pb.enable_steady_tick(Duration::from_millis(80));

    let res: Result<ArchiveSummary, (Stage, anyhow::Error)> = (|| {
        let wc = WorkingCopy::acquire(clones, name).map_err(|e| (Stage::Clone, e))?;
        tracing::debug!("cloning {}", name);
        clone_repo(&job.url, wc.path(), creds).map_err(|e| (Stage::Clone, e))?;

        pb.set_message(format!("archiving {}", name));
        tracing::debug!("archiving {} -> {}", name, job.archive_path.display());
        let summary = build_archive(wc.path(), &job.archive_path).map_err(|e| (Stage::Archive, e))?;

        if let Err(e) = wc.release() {
            mp.suspend(|| tracing::warn!("{:#}", e));
        }
        Ok(summary)
    })();

    match &res {
        Ok(s) => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!("archived {} ({} bytes)", name, s.bytes));
        }
        Err((stage, e)) => {
            pb.set_style(err_style());
            pb.finish_with_message(format!("{} {} (error: {})", stage, name, e));
        }
    }
    res
}

/// Upload one archive and delete it locally, whatever happened.
fn upload_one(job: &ArchiveJob, uploader: &ArchiveUploader, mp: &MultiProgress) -> Result<(), String> {
    let name = &job.record.full_name;
    let size = std::fs::metadata(&job.archive_path).map(|m| m.len()).unwrap_or(0);
    let pb = mp.add(ProgressBar::new(size));
    pb.set_style(upload_style());
    pb.set_message(name.clone());

    tracing::debug!("uploading {} as {}", name, job.remote_name);
    let res = uploader.upload(&job.archive_path, &job.remote_name, |n| pb.set_position(n));
    remove_archive(&job.archive_path);

    match res {
        Ok(out) => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!("uploaded {} ({} bytes)", name, out.bytes));
            tracing::debug!("{} uploaded in {} requests", name, out.requests);
            Ok(())
        }
        Err(e) => {
            pb.set_style(err_style());
            pb.finish_with_message(format!("upload {} (error: {})", name, e));
            mp.suspend(|| tracing::error!("upload of {} failed: {}", name, e));
            Err(e.to_string())
        }
    }
}

/// Print the change set without touching anything.
pub fn cmd_plan(config_path: Option<&Path>) -> Result<()> {
    let (cfg, p) = load_context(config_path)?;
    let wm = watermark::load(&p.state)?;
    let hosting = GitHubClient::new(&cfg.github.api_url, &cfg.github.token)?;
    let records = hosting
        .fetch_records(&cfg.owners)
        .context("listing repositories")?;
    let changed = resolve(&records, &wm, &cfg.owners);

    if changed.is_empty() {
        println!("nothing changed ({} repositories)", records.len());
        return Ok(());
    }
    for r in &changed {
        match wm.get(&r.full_name) {
            Some(seen) => println!(
                "- {} ({} > {})",
                r.full_name,
                r.last_modified.to_rfc3339(),
                seen.to_rfc3339()
            ),
            None => println!("- {} ({}, new)", r.full_name, r.last_modified.to_rfc3339()),
        }
    }
    Ok(())
}
