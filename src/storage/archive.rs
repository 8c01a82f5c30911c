//! Raw response archive
//!
//! Every HTTP response body is written verbatim to its own file named
//! `<prefix>_<YYYYMMDD_HHMMSS>.json` (UTC) before any parsing happens, so the
//! audit trail survives parse failures.

use crate::storage::traits::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Directory of archived raw responses
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    dir: PathBuf,
}

impl ResponseArchive {
    /// Opens the archive, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::file(&dir, e))?;
        Ok(Self { dir })
    }

    /// Archives a body stamped with the current UTC time
    pub fn archive(&self, prefix: &str, body: &str) -> StorageResult<PathBuf> {
        self.archive_at(prefix, body, Utc::now())
    }

    /// Archives a body stamped with `at`
    ///
    /// Two responses within the same second get `_1`, `_2`, ... suffixes
    /// instead of overwriting each other.
    pub fn archive_at(&self, prefix: &str, body: &str, at: DateTime<Utc>) -> StorageResult<PathBuf> {
        let stamp = at.format("%Y%m%d_%H%M%S");
        let mut suffix = 0u32;

        loop {
            let name = if suffix == 0 {
                format!("{}_{}.json", prefix, stamp)
            } else {
                format!("{}_{}_{}.json", prefix, stamp, suffix)
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())
                        .map_err(|e| StorageError::file(&path, e))?;
                    tracing::debug!("Response logged to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(StorageError::file(&path, e)),
            }
        }
    }
}
