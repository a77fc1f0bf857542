//! SQLite-based run history store

use crate::core::{ExecutionStatus, FailureKind};
use crate::persistence::{PersistenceBackend, RunSummary, HISTORY_DB};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT id, pipeline_name, status, branch, commit_sha, images, started_at, completed_at,
           completed_steps, total_steps, failed_step, failure, artifacts
    FROM runs
"#;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open history database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Database that lives as long as the store
    pub async fn in_memory() -> Result<Self> {
        // Every pooled connection would otherwise see its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// `history.db` inside `data_dir`
    pub async fn in_data_dir(data_dir: &Path) -> Result<Self> {
        Self::new(&data_dir.join(HISTORY_DB)).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                branch TEXT,
                commit_sha TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_steps INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL DEFAULT 0,
                failed_step TEXT,
                failure TEXT,
                artifacts TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize history schema")?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn row_to_summary(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.get("status");
        let failure: Option<String> = row.get("failure");
        let images: String = row.get("images");
        let artifacts: String = row.get("artifacts");

        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: ExecutionStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            branch: row.get("branch"),
            commit: row.get("commit_sha"),
            images: serde_json::from_str(&images).context("Invalid images column")?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            completed_steps: row.get::<i64, _>("completed_steps") as usize,
            total_steps: row.get::<i64, _>("total_steps") as usize,
            failed_step: row.get("failed_step"),
            failure: failure.as_deref().and_then(FailureKind::parse),
            artifacts: serde_json::from_str(&artifacts).context("Invalid artifacts column")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, branch, commit_sha, images, started_at, completed_at,
             completed_steps, total_steps, failed_step, failure, artifacts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(run.status.as_str())
        .bind(&run.branch)
        .bind(&run.commit)
        .bind(serde_json::to_string(&run.images)?)
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.completed_steps as i64)
        .bind(run.total_steps as i64)
        .bind(&run.failed_step)
        .bind(run.failure.map(|kind| kind.as_str()))
        .bind(serde_json::to_string(&run.artifacts)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match pipeline_name {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SELECT_RUNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_RUNS))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<(String, usize)>> {
        let rows = sqlx::query(
            r#"
            SELECT pipeline_name, COUNT(*) AS runs
            FROM runs
            GROUP BY pipeline_name
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("pipeline_name"),
                    row.get::<i64, _>("runs") as usize,
                )
            })
            .collect())
    }
}
