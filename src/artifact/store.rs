//! Filesystem artifact store
//!
//! Layout under the store root:
//!
//! ```text
//! .staging/<run-id>/<name>/files/...   staged during a run
//! <run-id>/<name>/files/...            published copies
//! <run-id>/<name>/manifest.json        name, run id, size + SHA-256 per file
//! ```
//!
//! Staged artifacts only become visible through [`ArtifactStore::commit`],
//! which the engine calls after every job succeeded.

use crate::artifact::CollectedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";
const FILES_DIR: &str = "files";
const MANIFEST_FILE: &str = "manifest.json";

/// Artifact store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact '{name}' not found for run {run_id}")]
    NotFound { run_id: Uuid, name: String },

    #[error("artifact '{name}' already exists for run {run_id}")]
    AlreadyExists { run_id: Uuid, name: String },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One file of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Workspace-relative path, `/`-separated
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Description of a published artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

impl ArtifactManifest {
    /// Whether both manifests describe byte-identical file sets
    pub fn same_contents(&self, other: &ArtifactManifest) -> bool {
        self.name == other.name && self.files == other.files
    }

    /// Total size in bytes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// An artifact copied into staging, waiting for the run to succeed
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub manifest: ArtifactManifest,
    dir: PathBuf,
}

/// Artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(STAGING_DIR).join(run_id.to_string())
    }

    fn artifact_dir(&self, run_id: Uuid, name: &str) -> PathBuf {
        self.root.join(run_id.to_string()).join(name)
    }

    /// Copy collected files into staging and compute their digests
    pub fn stage(
        &self,
        run_id: Uuid,
        name: &str,
        files: &[CollectedFile],
    ) -> Result<StagedArtifact, StoreError> {
        let dir = self.staging_dir(run_id).join(name);
        if dir.exists() {
            return Err(StoreError::AlreadyExists {
                run_id,
                name: name.to_string(),
            });
        }
        let files_dir = dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir).map_err(io_err(&files_dir))?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let target = files_dir.join(&file.relative_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            let (size, sha256) = copy_hashed(&file.path, &target)?;

            entries.push(ManifestEntry {
                path: portable(&file.relative_path),
                size,
                sha256,
            });
        }

        let manifest = ArtifactManifest {
            name: name.to_string(),
            run_id,
            created_at: Utc::now(),
            files: entries,
        };
        write_manifest(&dir.join(MANIFEST_FILE), &manifest)?;

        debug!(artifact = %name, files = files.len(), "Staged artifact");
        Ok(StagedArtifact { manifest, dir })
    }

    /// Publish a staged artifact under its name
    pub fn commit(&self, staged: StagedArtifact) -> Result<ArtifactManifest, StoreError> {
        let target = self.artifact_dir(staged.manifest.run_id, &staged.manifest.name);
        if target.exists() {
            return Err(StoreError::AlreadyExists {
                run_id: staged.manifest.run_id,
                name: staged.manifest.name.clone(),
            });
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::rename(&staged.dir, &target).map_err(io_err(&target))?;

        info!(
            artifact = %staged.manifest.name,
            run_id = %staged.manifest.run_id,
            files = staged.manifest.files.len(),
            "Published artifact"
        );
        Ok(staged.manifest)
    }

    /// Publish every staged artifact of a run, or none of them
    ///
    /// When one commit fails, the artifacts this call already published are
    /// removed again before the error is returned.
    pub fn commit_all(&self, staged: Vec<StagedArtifact>) -> Result<Vec<ArtifactManifest>, StoreError> {
        let mut published: Vec<ArtifactManifest> = Vec::with_capacity(staged.len());
        for artifact in staged {
            match self.commit(artifact) {
                Ok(manifest) => published.push(manifest),
                Err(e) => {
                    for manifest in &published {
                        self.unpublish(manifest.run_id, &manifest.name);
                    }
                    return Err(e);
                }
            }
        }
        Ok(published)
    }

    fn unpublish(&self, run_id: Uuid, name: &str) {
        let dir = self.artifact_dir(run_id, name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => warn!(artifact = %name, run_id = %run_id, "Withdrew published artifact"),
            Err(e) => warn!(path = ?dir, error = %e, "Failed to withdraw published artifact"),
        }
        // Only succeeds once the run directory is empty
        let _ = fs::remove_dir(self.root.join(run_id.to_string()));
    }

    /// Drop everything staged for a run
    pub fn discard(&self, run_id: Uuid) -> Result<(), StoreError> {
        let dir = self.staging_dir(run_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
            debug!(run_id = %run_id, "Discarded staged artifacts");
        }
        Ok(())
    }

    /// Manifest of a published artifact
    pub fn manifest(&self, run_id: Uuid, name: &str) -> Result<ArtifactManifest, StoreError> {
        let path = self.artifact_dir(run_id, name).join(MANIFEST_FILE);
        if !path.exists() {
            return Err(StoreError::NotFound {
                run_id,
                name: name.to_string(),
            });
        }
        read_manifest(&path)
    }

    /// All artifacts published by a run, sorted by name
    pub fn list(&self, run_id: Uuid) -> Result<Vec<ArtifactManifest>, StoreError> {
        let run_dir = self.root.join(run_id.to_string());
        if !run_dir.exists() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in fs::read_dir(&run_dir).map_err(io_err(&run_dir))? {
            let entry = entry.map_err(io_err(&run_dir))?;
            let path = entry.path().join(MANIFEST_FILE);
            if path.is_file() {
                manifests.push(read_manifest(&path)?);
            }
        }
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }

    /// Copy a published artifact's files into `dest`, keeping relative paths
    pub fn download(&self, run_id: Uuid, name: &str, dest: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let manifest = self.manifest(run_id, name)?;
        let files_dir = self.artifact_dir(run_id, name).join(FILES_DIR);

        let mut written = Vec::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            let source = files_dir.join(&entry.path);
            let target = dest.join(&entry.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            fs::copy(&source, &target).map_err(io_err(&source))?;
            written.push(target);
        }
        Ok(written)
    }
}

fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Passes writes through while hashing them
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `source` to `target`, returning the size and SHA-256 of the bytes
fn copy_hashed(source: &Path, target: &Path) -> Result<(u64, String), StoreError> {
    let mut reader = fs::File::open(source).map_err(io_err(source))?;
    let mut writer = HashingWriter {
        inner: io::BufWriter::new(fs::File::create(target).map_err(io_err(target))?),
        hasher: Sha256::new(),
    };
    let size = io::copy(&mut reader, &mut writer).map_err(io_err(target))?;
    writer.flush().map_err(io_err(target))?;
    Ok((size, format!("{:x}", writer.hasher.finalize())))
}

fn write_manifest(path: &Path, manifest: &ArtifactManifest) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(manifest).map_err(|source| StoreError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err(path))
}

fn read_manifest(path: &Path) -> Result<ArtifactManifest, StoreError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}
