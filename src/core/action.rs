//! Reusable actions referenced by `uses:` steps

use crate::artifact::ArtifactSpec;
use crate::core::step::StepPhase;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const CHECKOUT: &str = "actions/checkout";
pub const SETUP_PYTHON: &str = "actions/setup-python";
pub const UPLOAD_ARTIFACT: &str = "actions/upload-artifact";

/// Exports the source tree at the trigger commit into the workspace
const CHECKOUT_TEMPLATE: &str = r#"git -C "{{ source }}" archive --format=tar -o "{{ workspace }}/.localci-checkout.tar" "{{ trigger.commit }}"
tar -x -f "{{ workspace }}/.localci-checkout.tar" -C "{{ workspace }}"
rm -f "{{ workspace }}/.localci-checkout.tar""#;

/// Verifies the requested interpreter is present on the worker
const SETUP_PYTHON_TEMPLATE: &str = "python{{ inputs.python-version }} --version";

/// Action defined in the pipeline's `actions:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Shell template; `{{ inputs.<key> }}` renders the step's `with` values
    pub run: String,

    /// Failure classification of steps using this action
    #[serde(default = "default_action_phase")]
    pub phase: StepPhase,

    /// Default input values
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_action_phase() -> StepPhase {
    StepPhase::Setup
}

/// What a `uses:` reference turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// A shell template run like a `run:` step
    Command {
        template: String,
        phase: StepPhase,
        inputs: BTreeMap<String, String>,
    },
    /// An artifact upload declaration
    Upload(ArtifactSpec),
}

/// Built-in plus pipeline-defined actions
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    custom: HashMap<String, ActionConfig>,
}

impl ActionCatalog {
    pub fn new(custom: HashMap<String, ActionConfig>) -> Self {
        Self { custom }
    }

    /// `actions/checkout@v4` -> `actions/checkout`
    pub fn strip_version(reference: &str) -> &str {
        reference
            .split_once('@')
            .map(|(name, _)| name)
            .unwrap_or(reference)
    }

    /// Resolve a reference with its `with:` inputs
    pub fn resolve(
        &self,
        reference: &str,
        with: &BTreeMap<String, String>,
    ) -> Result<ResolvedAction, String> {
        let name = Self::strip_version(reference);

        // Pipeline definitions shadow built-ins
        if let Some(action) = self.custom.get(name).or_else(|| self.custom.get(reference)) {
            let mut inputs = action.inputs.clone();
            inputs.extend(with.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok(ResolvedAction::Command {
                template: action.run.clone(),
                phase: action.phase,
                inputs,
            });
        }

        match name {
            CHECKOUT => Ok(ResolvedAction::Command {
                template: CHECKOUT_TEMPLATE.to_string(),
                phase: StepPhase::Setup,
                inputs: with.clone(),
            }),
            SETUP_PYTHON => {
                let mut inputs = with.clone();
                inputs
                    .entry("python-version".to_string())
                    .or_insert_with(|| "3".to_string());
                Ok(ResolvedAction::Command {
                    template: SETUP_PYTHON_TEMPLATE.to_string(),
                    phase: StepPhase::Setup,
                    inputs,
                })
            }
            UPLOAD_ARTIFACT => {
                let artifact = with
                    .get("name")
                    .ok_or_else(|| format!("'{}' requires a 'name' input", reference))?;
                let path = with
                    .get("path")
                    .ok_or_else(|| format!("'{}' requires a 'path' input", reference))?;
                let spec = ArtifactSpec::new(artifact.clone(), path);
                spec.validate()?;
                Ok(ResolvedAction::Upload(spec))
            }
            _ => Err(format!("unknown action '{}'", reference)),
        }
    }
}
