//! # rvault
//!
//! **rvault** backs up every changed repository of a GitHub account to a
//! SharePoint / OneDrive drive.
//!
//! Features:
//! - `rvault run` (default) clones, archives and uploads changed repositories
//! - `rvault plan` shows which repositories a run would pick up
//! - `rvault status` prints the stored watermark
//! - `rvault home` prints the rvault home directory
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use rvault::{cmd_plan, cmd_run, cmd_status, logging, rvault_home};

#[derive(Parser, Debug)]
#[command(
    name = "rvault",
    version,
    about = "rvault - incremental repository backup to cloud storage"
)]
struct Cli {
    /// Config file (default: $(rvault home)/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Back up repositories changed since the last run
    Run,
    /// List repositories the next run would back up
    Plan,
    /// Print the stored watermark
    Status,
    /// Print the rvault home directory
    Home,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = cli.config.as_deref();

    match cli.cmd.unwrap_or(Cmd::Run) {
        Cmd::Run => {
            let report = cmd_run(config, cli.quiet)?;
            print!("{}", report.render());
            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Cmd::Plan => cmd_plan(config)?,
        Cmd::Status => cmd_status(config)?,
        Cmd::Home => println!("{}", rvault_home()?.display()),
    }
    Ok(ExitCode::SUCCESS)
}
