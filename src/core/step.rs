//! Step domain model

use crate::artifact::ArtifactSpec;
use crate::core::{
    action::{ActionCatalog, ResolvedAction},
    config::StepConfig,
    error::{PipelineError, StepFailureReason},
    state::StepState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which failure class a step reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    /// Environment and tool provisioning
    Setup,
    /// Toolchain invocations
    Build,
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Shell text run through the worker shell
    Run(String),
    /// Reusable action rendered to a shell command
    Action {
        reference: String,
        template: String,
        inputs: BTreeMap<String, String>,
    },
    /// Artifact upload declaration
    Upload(ArtifactSpec),
}

/// A single step in a job
///
/// The definition is fixed once loaded; only the runtime state changes,
/// and only through the engine.
#[derive(Debug, Clone)]
pub struct Step {
    id: String,
    name: String,
    action: StepAction,
    phase: StepPhase,
    env: BTreeMap<String, String>,
    timeout_secs: Option<u64>,
    qualified_id: String,
    state: StepState,
}

impl Step {
    /// Create a step from a step config
    ///
    /// `position` is the 1-based index inside the job, used for the id when
    /// the step has neither `id` nor a usable name.
    pub fn from_config(
        config: &StepConfig,
        job_id: &str,
        position: usize,
        actions: &ActionCatalog,
    ) -> Result<Self, String> {
        let name = config.display_name();
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| slug(&name).unwrap_or_else(|| format!("step-{}", position)));

        let (action, default_phase) = match (&config.run, &config.uses) {
            (Some(script), None) => (StepAction::Run(script.clone()), StepPhase::Build),
            (None, Some(reference)) => match actions.resolve(reference, &config.with)? {
                ResolvedAction::Command {
                    template,
                    phase,
                    inputs,
                } => (
                    StepAction::Action {
                        reference: reference.clone(),
                        template,
                        inputs,
                    },
                    phase,
                ),
                ResolvedAction::Upload(spec) => (StepAction::Upload(spec), StepPhase::Build),
            },
            (Some(_), Some(_)) => {
                return Err(format!("step '{}' has both 'run' and 'uses'", name));
            }
            (None, None) => {
                return Err(format!("step '{}' needs either 'run' or 'uses'", name));
            }
        };

        Ok(Step {
            qualified_id: format!("{}/{}", job_id, id),
            id,
            name,
            action,
            phase: config.phase.unwrap_or(default_phase),
            env: config.env.clone(),
            timeout_secs: config.effective_timeout_secs(),
            state: StepState::Pending,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `job/step`, unique within a pipeline
    pub fn qualified_id(&self) -> &str {
        &self.qualified_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &StepAction {
        &self.action
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Bound on the step's wait, `None` = unbounded
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: StepState) {
        self.state = state;
    }

    /// Whether the step spawns a process (uploads are handled in-process)
    pub fn spawns_process(&self) -> bool {
        !matches!(self.action, StepAction::Upload(_))
    }

    /// Shell template and the inputs it may reference
    pub fn command_template(&self) -> Option<(&str, Option<&BTreeMap<String, String>>)> {
        match &self.action {
            StepAction::Run(script) => Some((script, None)),
            StepAction::Action {
                template, inputs, ..
            } => Some((template, Some(inputs))),
            StepAction::Upload(_) => None,
        }
    }

    /// The run error this step raises for `reason`, classified by phase
    pub fn failure(&self, reason: StepFailureReason) -> PipelineError {
        let step = self.qualified_id.clone();
        match self.phase {
            StepPhase::Setup => PipelineError::SetupFailure { step, reason },
            StepPhase::Build => PipelineError::BuildFailure { step, reason },
        }
    }
}

/// `Install dependencies` -> `install-dependencies`
fn slug(name: &str) -> Option<String> {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    (!slug.is_empty()).then_some(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_config(yaml: &str) -> StepConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Install dependencies"), Some("install-dependencies".to_string()));
        assert_eq!(slug("  Build APK!! "), Some("build-apk".to_string()));
        assert_eq!(slug("???"), None);
    }

    #[test]
    fn test_run_step_defaults_to_build_phase() {
        let config = step_config("name: Build APK\nrun: buildozer android debug");
        let step = Step::from_config(&config, "build", 1, &ActionCatalog::default()).unwrap();

        assert_eq!(step.id(), "build-apk");
        assert_eq!(step.qualified_id(), "build/build-apk");
        assert_eq!(step.phase(), StepPhase::Build);
        assert!(step.timeout().is_none());
        assert!(matches!(step.state(), StepState::Pending));
    }

    #[test]
    fn test_explicit_phase_overrides_default() {
        let config = step_config(
            "name: Install dependencies\nphase: setup\nrun: sudo apt-get update",
        );
        let step = Step::from_config(&config, "build", 3, &ActionCatalog::default()).unwrap();
        assert_eq!(step.phase(), StepPhase::Setup);

        let err = step.failure(StepFailureReason::ExitCode(100));
        assert!(matches!(err, PipelineError::SetupFailure { .. }));
    }

    #[test]
    fn test_uses_step_resolves_action() {
        let config = step_config("uses: actions/checkout@v4");
        let step = Step::from_config(&config, "build", 1, &ActionCatalog::default()).unwrap();

        assert_eq!(step.name(), "actions/checkout@v4");
        assert_eq!(step.phase(), StepPhase::Setup);
        assert!(step.spawns_process());
    }

    #[test]
    fn test_upload_step_does_not_spawn() {
        let config = step_config(
            "name: Upload APK\nuses: actions/upload-artifact@v4\nwith:\n  name: loader-apk\n  path: bin/*.apk",
        );
        let step = Step::from_config(&config, "build", 5, &ActionCatalog::default()).unwrap();
        assert!(!step.spawns_process());
        assert!(step.command_template().is_none());
    }

    #[test]
    fn test_step_needs_run_or_uses() {
        let config = step_config("name: Nothing");
        assert!(Step::from_config(&config, "build", 1, &ActionCatalog::default()).is_err());

        let config = step_config("name: Both\nrun: echo\nuses: actions/checkout@v4");
        assert!(Step::from_config(&config, "build", 1, &ActionCatalog::default()).is_err());
    }
}
