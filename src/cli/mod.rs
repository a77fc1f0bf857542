//! Command-line interface

pub mod commands;
pub mod git;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{ArtifactsCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Local CI pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "localci")]
#[command(version = "0.1.0")]
#[command(
    about = "Run CI pipelines locally: sequential shell steps, fail-fast, globbed artifacts",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print step output lines as they are produced
    #[arg(short, long, global = true)]
    pub stream: bool,

    /// Directory for run history, artifacts and workspaces
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline for a push event
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// List pipelines recorded in history
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),

    /// Inspect and download published artifacts
    #[command(subcommand)]
    Artifacts(ArtifactsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Data directory: `--data-dir`, else `<local data dir>/localci`
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("localci")
        })
    }
}
