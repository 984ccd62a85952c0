use std::fmt;

use crate::archive::ArchiveSummary;

/// Pipeline step a repository failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clone,
    Archive,
    Watermark,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Clone => "clone",
            Stage::Archive => "archive",
            Stage::Watermark => "watermark",
            Stage::Upload => "upload",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    /// `owner/name`, or the state file path for [`Stage::Watermark`].
    pub subject: String,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct Archived {
    pub repo: String,
    pub summary: ArchiveSummary,
}

/// Everything a run did, for the closing summary and the exit code.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub considered: usize,
    pub changed: usize,
    pub archived: Vec<Archived>,
    pub uploaded: Vec<String>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, subject: impl Into<String>, stage: Stage, error: impl fmt::Display) {
        self.failures.push(Failure {
            subject: subject.into(),
            stage,
            error: error.to_string(),
        });
    }

    /// Human-readable summary, one line per archive and failure.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} repositories considered, {} changed, {} archived, {} uploaded, {} failed\n",
            self.considered,
            self.changed,
            self.archived.len(),
            self.uploaded.len(),
            self.failures.len()
        );
        for a in &self.archived {
            let mark = if self.uploaded.contains(&a.repo) { "✔" } else { "✘" };
            out.push_str(&format!(
                "{} {} ({} entries, {} bytes, sha256 {})\n",
                mark,
                a.repo,
                a.summary.entries,
                a.summary.bytes,
                &a.summary.sha256[..a.summary.sha256.len().min(12)]
            ));
        }
        for f in &self.failures {
            out.push_str(&format!("✘ {} [{}]: {}\n", f.subject, f.stage, f.error));
        }
        out
    }
}
