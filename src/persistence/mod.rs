//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{FailureKind, Pipeline};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// File name of the history database inside the data directory
pub const HISTORY_DB: &str = "history.db";

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: ExecutionStatus,

    /// Trigger branch
    pub branch: Option<String>,

    /// Trigger commit
    pub commit: Option<String>,

    /// Worker image labels, one per job
    pub images: Vec<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run ended
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of completed steps
    pub completed_steps: usize,

    /// Total number of steps
    pub total_steps: usize,

    /// Step that aborted the run, as `job/step`
    pub failed_step: Option<String>,

    /// Error kind of the failure
    pub failure: Option<FailureKind>,

    /// Published artifact names
    pub artifacts: Vec<String>,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }

    /// Duration of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one pipeline
    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// Pipeline names with their run counts, sorted by name
    async fn list_pipelines(&self) -> Result<Vec<(String, usize)>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| pipeline_name.map_or(true, |name| run.pipeline_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<(String, usize)>> {
        let runs = self.runs.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for run in runs.values() {
            *counts.entry(run.pipeline_name.as_str()).or_default() += 1;
        }
        let mut pipelines: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        pipelines.sort();
        Ok(pipelines)
    }
}

/// Create a summary from a pipeline after a run
pub fn create_summary(pipeline: &Pipeline) -> RunSummary {
    let state = &pipeline.state;
    RunSummary {
        run_id: state.run_id,
        pipeline_name: pipeline.name.clone(),
        status: state.status,
        branch: state.branch.clone(),
        commit: state.commit.clone(),
        images: pipeline.jobs().iter().map(|job| job.image().label()).collect(),
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        completed_steps: state.completed_steps,
        total_steps: state.total_steps,
        failed_step: state.failed_step.clone(),
        failure: state.failure,
        artifacts: state.artifacts.clone(),
    }
}
