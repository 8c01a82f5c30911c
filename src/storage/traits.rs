//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and the
//! error type shared by every persisted artifact (checkpoint, record set,
//! response archive).

use crate::state::Checkpoint;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Checkpoint at {} is corrupt: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("Record file {} has columns {found:?}, expected {expected:?}", path.display())]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Record {key:?} has {found} fields, expected {expected}")]
    RecordWidth {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wraps an I/O error with the path it happened on
    pub fn file(path: &Path, source: std::io::Error) -> Self {
        Self::File {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for checkpoint backend implementations
///
/// There is exactly one checkpoint per output destination; the destination is
/// the path of the record set the checkpoint describes.
pub trait CheckpointStore: Send {
    /// Loads the checkpoint for a destination
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Checkpoint))` - A valid checkpoint exists
    /// * `Ok(None)` - No checkpoint has been written yet
    /// * `Err(StorageError::CheckpointCorrupt)` - A checkpoint exists but cannot be read
    fn load(&self, destination: &Path) -> StorageResult<Option<Checkpoint>>;

    /// Durably replaces the checkpoint for a destination
    ///
    /// Implementations must be atomic: after a crash the previous or the new
    /// checkpoint is readable, never a partial one.
    fn save(&mut self, destination: &Path, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Removes the checkpoint for a destination, if any
    fn clear(&mut self, destination: &Path) -> StorageResult<()>;

    /// Human-readable location of the checkpoint (for logging)
    fn location(&self, destination: &Path) -> PathBuf;
}
