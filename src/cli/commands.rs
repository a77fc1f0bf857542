//! CLI command definitions

use clap::{Args, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Branch of the push event (defaults to the source checkout's branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Commit of the push event; resolved to a full SHA when possible
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Source repository the checkout action exports from
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Root for per-run workspaces (defaults to `<data-dir>/workspaces`)
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Remove each job's workspace when the job ends
    #[arg(long)]
    pub clean: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines found in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<Uuid>,
}

/// Artifact subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum ArtifactsCommand {
    /// List artifacts published by a run
    List {
        run_id: Uuid,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Copy an artifact's files to a directory
    Download {
        run_id: Uuid,
        name: String,
        dest: PathBuf,
    },
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
