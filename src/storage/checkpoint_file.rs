//! JSON checkpoint files
//!
//! Checkpoints are written next to the record set as `<stem>_metadata.json`
//! unless an explicit path is configured. Every save goes through a temporary
//! file in the same directory followed by a rename.

use crate::state::Checkpoint;
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Checkpoint store backed by pretty-printed JSON documents
#[derive(Debug, Clone, Default)]
pub struct JsonCheckpointStore {
    /// Fixed checkpoint path; when unset the path is derived from the destination
    path: Option<PathBuf>,
}

impl JsonCheckpointStore {
    /// Creates a store that derives the checkpoint path from each destination
    pub fn new() -> Self {
        Self { path: None }
    }

    /// Creates a store that always uses the given checkpoint path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn path_for(&self, destination: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| checkpoint_path_for(destination))
    }
}

/// Derives `<stem>_metadata.json` next to a record set file
///
/// # Example
///
/// ```
/// use ripple_harvest::storage::checkpoint_path_for;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     checkpoint_path_for(Path::new("out/members.csv")),
///     PathBuf::from("out/members_metadata.json")
/// );
/// ```
pub fn checkpoint_path_for(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "records".to_string());
    destination.with_file_name(format!("{}_metadata.json", stem))
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self, destination: &Path) -> StorageResult<Option<Checkpoint>> {
        let path = self.path_for(destination);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file(&path, e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| StorageError::CheckpointCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Loaded checkpoint from {} (cursor present: {})",
            path.display(),
            checkpoint.cursor.is_some()
        );

        Ok(Some(checkpoint))
    }

    fn save(&mut self, destination: &Path, checkpoint: &Checkpoint) -> StorageResult<()> {
        let path = self.path_for(destination);
        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(|e| StorageError::file(dir, e))?;

        let json = serde_json::to_string_pretty(checkpoint)?;

        // Write atomically (temp file in the same directory, then rename)
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::file(dir, e))?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| StorageError::file(&path, e.error))?;

        tracing::trace!("Checkpoint saved to {}", path.display());
        Ok(())
    }

    fn clear(&mut self, destination: &Path) -> StorageResult<()> {
        let path = self.path_for(destination);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Removed checkpoint {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::file(&path, e)),
        }
    }

    fn location(&self, destination: &Path) -> PathBuf {
        self.path_for(destination)
    }
}

/// Directory holding `path`, `.` for bare file names
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
