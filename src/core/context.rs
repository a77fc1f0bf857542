//! Run context - variables available to step templates

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Error raised while rendering a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unknown template variable '{0}'")]
    UnknownVariable(String),
}

/// `{{ key }}`, or `{{ 'text' }}` which renders `text` verbatim
fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*(?:'([^']*)'|([A-Za-z0-9_.\-]+))\s*\}\}")
            .expect("placeholder regex is valid")
    })
}

/// Variables visible to a step when its command is rendered
///
/// Keys are dotted names (`trigger.branch`, `inputs.python-version`);
/// templates reference them as `{{ key }}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    variables: BTreeMap<String, String>,
}

impl RunContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a variable
    pub fn get(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    /// Copy of this context with `inputs.<key>` set for each action input
    pub fn with_inputs(&self, inputs: &BTreeMap<String, String>) -> Self {
        let mut context = self.clone();
        for (key, value) in inputs {
            context.set(format!("inputs.{}", key), value.clone());
        }
        context
    }

    /// Replace every `{{ key }}` in `template`
    ///
    /// Unknown keys are an error, never an empty substitution. Text that
    /// must reach the shell with literal braces (Go templates such as
    /// `{{.Names}}`) is written `{{ '{{' }}.Names}}`.
    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        if let Some(missing) = placeholder()
            .captures_iter(template)
            .filter_map(|caps| caps.get(2))
            .map(|key| key.as_str())
            .find(|key| !self.variables.contains_key(*key))
        {
            return Err(RenderError::UnknownVariable(missing.to_string()));
        }

        let rendered = placeholder().replace_all(template, |caps: &Captures| {
            match (caps.get(1), caps.get(2)) {
                (Some(literal), _) => literal.as_str().to_string(),
                (None, Some(key)) => self.variables.get(key.as_str()).cloned().unwrap_or_default(),
                (None, None) => String::new(),
            }
        });
        Ok(rendered.into_owned())
    }

    /// Render every value of an environment map
    pub fn render_env(
        &self,
        env: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, RenderError> {
        env.iter()
            .map(|(key, value)| Ok((key.clone(), self.render(value)?)))
            .collect()
    }
}
