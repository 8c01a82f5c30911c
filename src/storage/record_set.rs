//! Deduplicated CSV record set
//!
//! The record set owns the output file for the duration of a run. On open it
//! loads every existing row into an identity-key index so duplicates are
//! rejected across full restarts, not only across resumed runs. Each merged
//! page is written with a single append and an fsync before the merge
//! returns.

use crate::storage::checkpoint_file::parent_dir;
use crate::storage::traits::{StorageError, StorageResult};
use crate::storage::Record;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// What to do when a batch contains an identity key that is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the stored row, drop the incoming one
    #[default]
    FirstWriteWins,

    /// Replace the stored fields in place, keeping the original position
    Refresh,
}

/// Outcome of merging one batch
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Records whose key was not seen before, in batch order
    pub added: Vec<Record>,

    /// Existing rows whose fields were replaced (Refresh policy only)
    pub refreshed: usize,

    /// Incoming records dropped because their key was already stored
    pub duplicates: usize,

    /// Incoming records dropped because they had no identity key
    pub skipped: usize,
}

/// Ordered, identity-keyed record collection backed by a CSV file
#[derive(Debug)]
pub struct RecordSet {
    path: PathBuf,
    columns: Vec<String>,
    key_column: usize,
    policy: DuplicatePolicy,
    rows: Vec<Record>,
    index: HashMap<String, usize>,
    existing: usize,
}

impl RecordSet {
    /// Opens (or creates) the record set at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - CSV file holding the records
    /// * `columns` - Header row; must match an existing file exactly
    /// * `key_column` - Index of the identity key in `columns`
    /// * `policy` - Behaviour on re-encountering a stored key
    ///
    /// # Returns
    ///
    /// * `Ok(RecordSet)` - Existing rows loaded, torn trailing row (if any) removed
    /// * `Err(StorageError)` - The file could not be read or has a different header
    pub fn open(
        path: impl Into<PathBuf>,
        columns: &[&str],
        key_column: usize,
        policy: DuplicatePolicy,
    ) -> StorageResult<Self> {
        let path = path.into();
        let mut set = Self {
            path,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            key_column,
            policy,
            rows: Vec::new(),
            index: HashMap::new(),
            existing: 0,
        };

        if let Some(truncated_at) = repair_torn_tail(&set.path)? {
            tracing::warn!(
                "Removed torn trailing row from {} (truncated to {} bytes)",
                set.path.display(),
                truncated_at
            );
        }

        let has_content = match fs::metadata(&set.path) {
            Ok(meta) => meta.len() > 0,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::file(&set.path, e)),
        };

        if has_content {
            set.load_existing()?;
        } else {
            set.rewrite()?;
        }

        set.existing = set.rows.len();
        if set.existing > 0 {
            tracing::info!(
                "Found {} existing records in {} ({} unique keys)",
                set.existing,
                set.path.display(),
                set.index.len()
            );
        }

        Ok(set)
    }

    fn load_existing(&mut self) -> StorageResult<()> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header != self.columns {
            return Err(StorageError::SchemaMismatch {
                path: self.path.clone(),
                expected: self.columns.clone(),
                found: header,
            });
        }

        for (line, row) in reader.records().enumerate() {
            let row = row?;
            if row.len() != self.columns.len() {
                tracing::warn!(
                    "Ignoring row {} of {}: {} fields, expected {}",
                    line + 2,
                    self.path.display(),
                    row.len(),
                    self.columns.len()
                );
                continue;
            }
            let fields: Vec<String> = row.iter().map(str::to_string).collect();
            let key = fields[self.key_column].clone();
            let position = self.rows.len();
            if !key.is_empty() {
                self.index.entry(key.clone()).or_insert(position);
            }
            self.rows.push(Record { key, fields });
        }

        Ok(())
    }

    /// Merges a batch and persists its effect before returning
    ///
    /// New keys are appended in batch order. Known keys are dropped under
    /// `FirstWriteWins`; under `Refresh` they replace the stored fields and the
    /// file is rewritten atomically. Records without a key are skipped.
    pub fn merge(&mut self, batch: Vec<Record>) -> StorageResult<MergeResult> {
        if let Some(bad) = batch.iter().find(|r| r.fields.len() != self.columns.len()) {
            return Err(StorageError::RecordWidth {
                key: bad.key.clone(),
                expected: self.columns.len(),
                found: bad.fields.len(),
            });
        }

        let mut result = MergeResult::default();
        let first_new = self.rows.len();

        for record in batch {
            if record.key.is_empty() {
                result.skipped += 1;
                continue;
            }

            match self.index.get(&record.key) {
                Some(&position) => match self.policy {
                    DuplicatePolicy::FirstWriteWins => result.duplicates += 1,
                    DuplicatePolicy::Refresh => {
                        if position < first_new {
                            if self.rows[position] != record {
                                result.refreshed += 1;
                            }
                        } else {
                            result.duplicates += 1;
                        }
                        self.rows[position] = record;
                    }
                },
                None => {
                    self.index.insert(record.key.clone(), self.rows.len());
                    self.rows.push(record);
                }
            }
        }

        result.added = self.rows[first_new..].to_vec();

        if result.refreshed > 0 {
            self.rewrite()?;
        } else if !result.added.is_empty() {
            self.append(&result.added)?;
        }

        if result.duplicates > 0 {
            tracing::debug!("Skipped {} duplicate records", result.duplicates);
        }

        Ok(result)
    }

    /// Appends rows with one write and an fsync
    fn append(&self, records: &[Record]) -> StorageResult<()> {
        let mut writer = csv_writer(Vec::new());
        for record in records {
            writer.write_record(&record.fields)?;
        }
        let buffer = writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::file(&self.path, e))?;
        file.write_all(&buffer)?;
        file.sync_data()?;
        Ok(())
    }

    /// Replaces the whole file (header + all rows) via temp file and rename
    fn rewrite(&self) -> StorageResult<()> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir).map_err(|e| StorageError::file(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::file(dir, e))?;
        {
            let mut writer = csv_writer(tmp.as_file_mut());
            writer.write_record(&self.columns)?;
            for record in &self.rows {
                writer.write_record(&record.fields)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StorageError::file(&self.path, e.error))?;
        Ok(())
    }

    /// Returns true if `key` is already stored
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of rows in the set (rows without a key included)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows that were on disk when the set was opened
    pub fn existing_count(&self) -> usize {
        self.existing
    }

    /// Rows in insertion order
    pub fn records(&self) -> &[Record] {
        &self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(inner)
}

/// Truncates a trailing row that was only partially written
///
/// Every complete write ends with a record terminator, closes its quotes and
/// carries as many fields as the header. The last row parsed from the file is
/// checked against all three; a write cut inside a quoted field can still end
/// in `\n`, so the terminator alone is not enough. A torn row is cut off at
/// its start offset as located by the CSV parser (quoted newlines included).
///
/// # Returns
///
/// * `Ok(Some(len))` - The file was truncated to `len` bytes
/// * `Ok(None)` - Nothing to repair (missing, empty or complete file)
fn repair_torn_tail(path: &Path) -> StorageResult<Option<u64>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::file(path, e)),
    };

    let Some(cut_at) = torn_row_start(&bytes) else {
        return Ok(None);
    };

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StorageError::file(path, e))?;
    file.set_len(cut_at)?;
    file.sync_all()?;

    Ok(Some(cut_at))
}

/// Byte offset of the last row when that row is incomplete
fn torn_row_start(bytes: &[u8]) -> Option<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut record = csv::ByteRecord::new();
    let mut header_width = None;
    let mut last = None;

    loop {
        let start = reader.position().byte();
        match reader.read_byte_record(&mut record) {
            Ok(true) => {
                header_width.get_or_insert(record.len());
                last = Some((start, record.len()));
            }
            Ok(false) => break,
            Err(_) => return Some(start),
        }
    }

    let (start, width) = last?;
    let tail = bytes.get(start as usize..)?;
    let quotes = tail.iter().filter(|&&b| b == b'"').count();
    let complete = tail.ends_with(b"\n") && quotes % 2 == 0 && header_width == Some(width);
    (!complete).then_some(start)
}

/// Counts data rows in a CSV file without a schema
///
/// Used by the statistics view, which has no adapter at hand.
pub fn count_records(path: &Path) -> StorageResult<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::file(path, e)),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let mut record = csv::ByteRecord::new();
    let mut count = 0;
    while reader.read_byte_record(&mut record)? {
        if !record.is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
