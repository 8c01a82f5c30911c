//! Storage module for persisting harvest data
//!
//! This module handles every artifact a harvest leaves on disk:
//! - Checkpoint documents (atomic JSON replacement)
//! - The deduplicated CSV record set (incremental, fsynced appends)
//! - The raw response archive (one file per HTTP call)
//! - Member lists read back for follow checks

mod archive;
mod checkpoint_file;
mod member_list;
mod record_set;
mod traits;

pub use archive::ResponseArchive;
pub use checkpoint_file::{checkpoint_path_for, JsonCheckpointStore};
pub use member_list::{read_members, Member};
pub use record_set::{count_records, DuplicatePolicy, MergeResult, RecordSet};
pub use traits::{CheckpointStore, StorageError, StorageResult};

/// A harvested entity
///
/// `fields` are aligned with the adapter's columns; `key` is the value of the
/// identity column and is what deduplication compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub fields: Vec<String>,
}

impl Record {
    pub fn new(key: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}
