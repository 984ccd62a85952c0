//! Crate entry point for **rvault**.
//!
//! rvault backs up hosted git repositories: it lists what the account can
//! see, works out which repositories changed since the last run, clones and
//! archives those, and pushes the archives to cloud storage through
//! resumable upload sessions.
//!
//! Each module covers one step; the `pub use` re-exports expose the CLI
//! commands and the pieces the integration tests drive directly.

pub mod archive;
pub mod config;
pub mod error;
pub mod git;
pub mod hosting;
pub mod logging;
pub mod paths;
mod progress;
mod status;
pub mod sync;
pub mod upload;
pub mod watermark;

pub use config::{Config, load_config};
pub use paths::{Paths, rvault_home};
pub use status::cmd_status;
pub use sync::{RunReport, cmd_plan, cmd_run, run};
