//! Trigger events and the filter that decides whether a run is scheduled

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Branch the push trigger listens on when `on` is omitted
pub const DEFAULT_BRANCH: &str = "main";

/// `on:` section of a pipeline definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Push trigger (absent = pushes never schedule the pipeline)
    #[serde(default)]
    pub push: Option<PushTriggerConfig>,
}

/// Push trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTriggerConfig {
    /// Branch glob patterns
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
}

fn default_branches() -> Vec<String> {
    vec![DEFAULT_BRANCH.to_string()]
}

/// Kind of external event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
}

/// The event that caused an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub branch: String,
    pub commit: String,
}

impl TriggerEvent {
    /// A push of `commit` to `branch`
    pub fn push(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            branch: branch.into(),
            commit: commit.into(),
        }
    }
}

/// Compiled trigger filter
#[derive(Debug, Clone)]
pub struct TriggerFilter {
    push_branches: Option<Vec<Pattern>>,
}

impl TriggerFilter {
    /// Build the filter from the `on:` section (`None` = push to main)
    pub fn from_config(config: Option<&TriggerConfig>) -> Result<Self, glob::PatternError> {
        let branches = match config {
            None => Some(default_branches()),
            Some(config) => config.push.as_ref().map(|push| push.branches.clone()),
        };

        let push_branches = branches
            .map(|branches| {
                branches
                    .iter()
                    .map(|branch| Pattern::new(branch))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Self { push_branches })
    }

    /// Check whether the event schedules the pipeline
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match event.kind {
            TriggerKind::Push => self
                .push_branches
                .as_ref()
                .is_some_and(|patterns| patterns.iter().any(|p| p.matches(&event.branch))),
        }
    }

    /// Branch patterns the push trigger listens on
    pub fn push_branches(&self) -> Vec<String> {
        self.push_branches
            .as_ref()
            .map(|patterns| patterns.iter().map(|p| p.as_str().to_string()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_only_matches_main() {
        let filter = TriggerFilter::from_config(None).unwrap();
        assert!(filter.matches(&TriggerEvent::push("main", "abc123")));
        assert!(!filter.matches(&TriggerEvent::push("develop", "abc123")));
        assert!(!filter.matches(&TriggerEvent::push("main-backup", "abc123")));
    }

    #[test]
    fn test_branch_globs() {
        let config: TriggerConfig = serde_yaml::from_str(
            r#"
push:
  branches: ["main", "release/*"]
"#,
        )
        .unwrap();
        let filter = TriggerFilter::from_config(Some(&config)).unwrap();

        assert!(filter.matches(&TriggerEvent::push("release/1.2", "HEAD")));
        assert!(filter.matches(&TriggerEvent::push("main", "HEAD")));
        assert!(!filter.matches(&TriggerEvent::push("feature/login", "HEAD")));
    }

    #[test]
    fn test_push_without_branches_defaults_to_main() {
        let config: TriggerConfig = serde_yaml::from_str("push: {}").unwrap();
        let filter = TriggerFilter::from_config(Some(&config)).unwrap();
        assert_eq!(filter.push_branches(), vec!["main".to_string()]);
    }

    #[test]
    fn test_no_push_trigger_never_matches() {
        let config = TriggerConfig { push: None };
        let filter = TriggerFilter::from_config(Some(&config)).unwrap();
        assert!(!filter.matches(&TriggerEvent::push("main", "HEAD")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let config = TriggerConfig {
            push: Some(PushTriggerConfig {
                branches: vec!["release/[".to_string()],
            }),
        };
        assert!(TriggerFilter::from_config(Some(&config)).is_err());
    }
}
