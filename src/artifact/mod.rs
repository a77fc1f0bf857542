//! Artifact declarations and collection from a worker workspace

pub mod store;

pub use store::{ArtifactManifest, ArtifactStore, ManifestEntry, StagedArtifact, StoreError};

use glob::Pattern;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A named artifact and the glob patterns that produce it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub name: String,
    pub patterns: Vec<String>,
}

/// A file matched by an artifact pattern
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollectedFile {
    /// Absolute path on the worker
    pub path: PathBuf,
    /// Path relative to the workspace
    pub relative_path: PathBuf,
}

impl ArtifactSpec {
    /// Parse the `path` input of an upload step: one glob per non-empty line
    pub fn new(name: impl Into<String>, path: &str) -> Self {
        Self {
            name: name.into(),
            patterns: path
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Check the name and patterns
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty()
            || self.name == "."
            || self.name == ".."
            || self.name.contains(['/', '\\'])
        {
            return Err(format!("invalid artifact name '{}'", self.name));
        }
        if self.patterns.is_empty() {
            return Err(format!("artifact '{}' has no path patterns", self.name));
        }
        for pattern in &self.patterns {
            Pattern::new(pattern)
                .map_err(|e| format!("artifact '{}' has invalid pattern '{}': {}", self.name, pattern, e))?;
        }
        Ok(())
    }

    /// Evaluate the patterns against `workspace`
    ///
    /// Relative patterns are anchored at the workspace. A matched directory
    /// contributes every file below it. The result is sorted and free of
    /// duplicates; an empty result is the caller's `ArtifactNotFound`.
    pub fn collect(&self, workspace: &Path) -> Vec<CollectedFile> {
        let mut files = BTreeSet::new();
        let anchor = Pattern::escape(&workspace.display().to_string());

        for pattern in &self.patterns {
            let full_pattern = if Path::new(pattern).is_absolute() {
                pattern.clone()
            } else {
                format!("{}/{}", anchor, pattern.trim_start_matches("./"))
            };

            match glob::glob(&full_pattern) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if entry.is_file() {
                            files.insert(collected(workspace, entry));
                        } else if entry.is_dir() {
                            collect_dir(workspace, &entry, &mut files);
                        }
                    }
                }
                Err(e) => {
                    warn!(pattern = %full_pattern, error = %e, "Failed to glob artifacts");
                }
            }
        }

        debug!(artifact = %self.name, matched = files.len(), "Collected artifact files");
        files.into_iter().collect()
    }
}

fn collected(workspace: &Path, path: PathBuf) -> CollectedFile {
    let relative_path = match path.strip_prefix(workspace) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.clone()),
    };
    CollectedFile {
        path,
        relative_path,
    }
}

fn collect_dir(workspace: &Path, dir: &Path, files: &mut BTreeSet<CollectedFile>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = ?dir, error = %e, "Failed to read artifact directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to stat artifact entry");
                continue;
            }
        };

        if file_type.is_dir() {
            collect_dir(workspace, &path, files);
        } else if file_type.is_file() {
            files.insert(collected(workspace, path));
        } else if file_type.is_symlink() {
            // Linked files are copied; linked directories are never walked
            if path.is_file() {
                files.insert(collected(workspace, path));
            } else {
                debug!(path = ?path, "Skipping symlink in artifact directory");
            }
        }
    }
}
