use anyhow::Result;
use std::{env, path::PathBuf};

/// Filesystem locations used by a run.
///
/// Everything lives under the rvault home unless the config overrides
/// `state_file` or `work_dir` (see [`Paths::with_overrides`]).
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub state: PathBuf,
    pub work: PathBuf,
}

impl Paths {
    /// Clone directory root; each repository gets its own temp dir below it.
    pub fn clones(&self) -> PathBuf {
        self.work.join("clones")
    }

    /// Archive directory root; archives are laid out as `<owner>/<repo>.tar.gz`.
    pub fn archives(&self) -> PathBuf {
        self.work.join("archives")
    }

    /// Replace the state file and work directory with configured values, if any.
    pub fn with_overrides(mut self, state: Option<&PathBuf>, work: Option<&PathBuf>) -> Self {
        if let Some(s) = state {
            self.state = s.clone();
        }
        if let Some(w) = work {
            self.work = w.clone();
        }
        self
    }
}

pub fn rvault_home() -> Result<PathBuf> {
    let xdg = env::var_os("XDG_CONFIG_HOME");
    let base = xdg
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env::var_os("HOME").unwrap_or_default()).join(".config"));
    Ok(base.join(".rvault"))
}

pub fn paths() -> Result<Paths> {
    let home = rvault_home()?;
    Ok(Paths {
        config: home.join("config.toml"),
        state: home.join("watermark.json"),
        work: home.join("work"),
    })
}
