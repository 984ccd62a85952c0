use anyhow::Result;
use std::path::Path;

use crate::config::load_context;
use crate::watermark;

/// CLI command: print the persisted watermark, one repository per line.
///
/// Example output:
/// ```text
/// acme/api      2024-06-01T09:30:00+00:00
/// acme/web      2024-05-28T17:02:11+00:00
/// ```
///
/// # Errors
/// Returns an error if the config or the watermark file cannot be read.
pub fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let (_, p) = load_context(config_path)?;
    let wm = watermark::load(&p.state)?;
    if wm.is_empty() {
        println!("no watermark yet ({})", p.state.display());
        return Ok(());
    }
    let mut rows: Vec<_> = wm.into_iter().collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    let width = rows.iter().map(|(r, _)| r.len()).max().unwrap_or(0);
    for (repo, time) in rows {
        println!("{:width$}  {}", repo, time.to_rfc3339(), width = width);
    }
    Ok(())
}
