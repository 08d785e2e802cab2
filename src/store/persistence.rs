//! Persistence medium contract for state snapshots.
//!
//! The state store reads and writes whole-map snapshots as opaque byte
//! blobs through [`SnapshotMedium`]. The default implementation targets the
//! local filesystem; tests or alternative deployments can substitute their
//! own medium without touching the store's rotation or restore logic.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Byte-level access to snapshot storage.
#[async_trait]
pub trait SnapshotMedium: Send + Sync {
    /// Write a full snapshot, creating parent directories as needed.
    async fn write_snapshot(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError>;

    /// Read a snapshot back; fails with [`PersistenceError::MissingSnapshot`]
    /// if nothing was ever written at `path`.
    async fn read_snapshot(&self, path: &Path) -> Result<Vec<u8>, PersistenceError>;

    /// List snapshot file names (not paths) in a directory. An absent
    /// directory lists as empty rather than failing.
    async fn list_snapshots(&self, dir: &Path) -> Result<Vec<String>, PersistenceError>;

    /// Delete one snapshot.
    async fn delete_snapshot(&self, path: &Path) -> Result<(), PersistenceError>;
}

/// Snapshot persistence failures.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("snapshot I/O failed at {path}: {source}")]
    #[diagnostic(
        code(taskweave::persistence::io),
        help("Check that the state directory exists and is writable.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no snapshot found at {path}")]
    #[diagnostic(
        code(taskweave::persistence::missing_snapshot),
        help("Persist at least once (or take a backup) before restoring.")
    )]
    MissingSnapshot { path: PathBuf },

    #[error("snapshot serialization failed: {source}")]
    #[diagnostic(
        code(taskweave::persistence::serde),
        help("Snapshot bytes must be the JSON entries array written by the store.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serde { source }
    }
}

/// Filesystem-backed snapshot medium using `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsSnapshotMedium;

impl FsSnapshotMedium {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SnapshotMedium for FsSnapshotMedium {
    async fn write_snapshot(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| PersistenceError::io(path, e))
    }

    async fn read_snapshot(&self, path: &Path) -> Result<Vec<u8>, PersistenceError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::MissingSnapshot {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    async fn list_snapshots(&self, dir: &Path) -> Result<Vec<String>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn delete_snapshot(&self, path: &Path) -> Result<(), PersistenceError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| PersistenceError::io(path, e))
    }
}
