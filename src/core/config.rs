//! Pipeline configuration from YAML

use crate::core::{
    action::ActionConfig,
    step::StepPhase,
    trigger::{TriggerConfig, TriggerFilter},
    Pipeline,
};
use anyhow::{Context, Result};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Worker label used when a job has no `runs-on`
pub const DEFAULT_RUNS_ON: &str = "ubuntu-latest";

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Trigger filter; omitted = push to `main`
    #[serde(default, rename = "on")]
    pub trigger: Option<TriggerConfig>,

    /// Template variables available to all steps
    #[serde(default, deserialize_with = "scalar_map")]
    pub variables: BTreeMap<String, String>,

    /// Environment for every step process
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Pipeline-defined actions, by reference
    #[serde(default)]
    pub actions: HashMap<String, ActionConfig>,

    /// Jobs in execution order (list, or mapping keyed by job id)
    #[serde(deserialize_with = "jobs_list")]
    pub jobs: Vec<JobConfig>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier (the mapping key in mapping form)
    #[serde(default)]
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Worker image label
    #[serde(default = "default_runs_on", rename = "runs-on", alias = "runs_on")]
    pub runs_on: String,

    /// Shell used for `run` scripts
    #[serde(default)]
    pub shell: Option<String>,

    /// Environment for every step of the job
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_runs_on() -> String {
    DEFAULT_RUNS_ON.to_string()
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step identifier (derived from the name when omitted)
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell text
    #[serde(default)]
    pub run: Option<String>,

    /// Action reference, `owner/name@version`
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: BTreeMap<String, String>,

    /// Environment for this step's process
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Failure classification override
    #[serde(default)]
    pub phase: Option<StepPhase>,

    /// Wait bound in seconds (absent = unbounded)
    #[serde(default, rename = "timeout-secs", alias = "timeout_secs")]
    pub timeout_secs: Option<u64>,

    /// Wait bound in minutes
    #[serde(default, rename = "timeout-minutes", alias = "timeout_minutes")]
    pub timeout_minutes: Option<u64>,
}

impl StepConfig {
    /// Name shown in output: `name`, else the action reference, else the
    /// first line of the script
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        self.run
            .as_deref()
            .and_then(|script| script.lines().map(str::trim).find(|l| !l.is_empty()))
            .map(|line| format!("Run {}", line))
            .unwrap_or_else(|| "step".to_string())
    }

    /// Effective timeout in seconds; `timeout-secs` wins over minutes
    pub fn effective_timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
            .or_else(|| self.timeout_minutes.map(|m| m.saturating_mul(60)))
    }
}

/// Render a YAML scalar the way it would read in a shell
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match scalar_to_string(&value) {
            Some(s) => Ok((key, s)),
            None => Err(D::Error::custom(format!(
                "value of '{}' must be a string, number or boolean",
                key
            ))),
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobsRepr {
    List(Vec<JobConfig>),
    Map(serde_yaml::Mapping),
}

fn jobs_list<'de, D>(deserializer: D) -> std::result::Result<Vec<JobConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    match JobsRepr::deserialize(deserializer)? {
        JobsRepr::List(jobs) => Ok(jobs),
        JobsRepr::Map(mapping) => mapping
            .into_iter()
            .map(|(key, value)| {
                let id = key
                    .as_str()
                    .ok_or_else(|| D::Error::custom("job ids must be strings"))?
                    .to_string();
                let mut job: JobConfig = serde_yaml::from_value(value)
                    .map_err(|e| D::Error::custom(format!("job '{}': {}", id, e)))?;
                job.id = id;
                Ok(job)
            })
            .collect(),
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            anyhow::bail!("Pipeline '{}' defines no jobs", self.name);
        }

        // Check that all job IDs are unique
        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                anyhow::bail!("Every job needs an id");
            }
            if !seen_ids.insert(&job.id) {
                anyhow::bail!("Duplicate job ID: {}", job.id);
            }
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job.id);
            }
        }

        for (reference, action) in &self.actions {
            if action.run.trim().is_empty() {
                anyhow::bail!("Action '{}' has an empty 'run' template", reference);
            }
        }

        TriggerFilter::from_config(self.trigger.as_ref())
            .context("Invalid branch pattern in 'on.push.branches'")?;

        // Step resolution: actions, artifact declarations, ids
        Pipeline::from_config(self)?;

        Ok(())
    }

    /// Operator warnings for a valid configuration
    pub fn lint(&self) -> Result<Vec<String>> {
        Ok(self.to_pipeline()?.lint())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}
