use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of pagination progress for one output destination
///
/// The checkpoint is mutated after every successfully merged page and saved
/// before the next fetch starts, so a crash loses at most the in-flight page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Cursor for the next page; `None` once the collection is exhausted
    #[serde(rename = "last_cursor")]
    pub cursor: Option<String>,

    /// Label of the collection this checkpoint belongs to (e.g. `community:123`)
    pub collection: String,

    /// Records parsed from pages, duplicates included
    pub total_fetched: u64,

    /// Records actually appended to the record set
    #[serde(rename = "collected_members")]
    pub new_records: u64,

    /// Records already on disk when the current run started
    #[serde(rename = "existing_members", default)]
    pub existing_records: u64,

    /// Pages successfully merged
    #[serde(default)]
    pub pages_fetched: u64,

    /// Rate-limit responses absorbed while producing this checkpoint
    pub rate_limit_hits: u64,

    /// Expected size of the full collection, when the API reports one
    #[serde(rename = "total_members", default)]
    pub target_total: Option<u64>,

    /// Informational completion percentage at save time
    #[serde(default)]
    pub progress_percentage: Option<f64>,

    /// SHA-256 of the config file that produced this checkpoint
    #[serde(default)]
    pub config_hash: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(rename = "last_updated")]
    pub last_updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates a checkpoint positioned at the start of the collection
    pub fn new(collection: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            cursor: None,
            collection: collection.into(),
            total_fetched: 0,
            new_records: 0,
            existing_records: 0,
            pages_fetched: 0,
            rate_limit_hits: 0,
            target_total: None,
            progress_percentage: None,
            config_hash: None,
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Returns true if a previous run already walked the cursor to its end
    ///
    /// A checkpoint without a cursor and without any merged page is
    /// indistinguishable from a fresh start and is not exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none() && self.pages_fetched > 0
    }

    /// Records one merged page and moves the cursor forward
    ///
    /// # Arguments
    ///
    /// * `next_cursor` - Cursor returned with the page (`None` ends the collection)
    /// * `fetched` - Number of records parsed from the page
    /// * `added` - Number of records the merge actually persisted
    pub fn record_page(&mut self, next_cursor: Option<String>, fetched: usize, added: usize) {
        self.cursor = next_cursor;
        self.pages_fetched += 1;
        self.total_fetched += fetched as u64;
        self.new_records += added as u64;
        self.last_updated_at = Utc::now();
    }

    /// Adds rate-limit hits absorbed by the retry controller
    pub fn record_rate_limit_hits(&mut self, hits: u32) {
        self.rate_limit_hits += u64::from(hits);
    }

    /// Completion ratio in `[0.0, 1.0]` given the number of records on disk
    ///
    /// Returns `None` when the expected total is unknown or zero.
    pub fn completion_ratio(&self, records_on_disk: u64) -> Option<f64> {
        match self.target_total {
            Some(total) if total > 0 => Some((records_on_disk as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    /// Refreshes the informational percentage before a save
    pub fn update_progress(&mut self, records_on_disk: u64) {
        self.progress_percentage = self.completion_ratio(records_on_disk).map(|r| r * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checkpoint_is_not_exhausted() {
        let checkpoint = Checkpoint::new("community:1");
        assert!(checkpoint.cursor.is_none());
        assert!(!checkpoint.is_exhausted());
    }

    #[test]
    fn test_record_page_advances_cursor() {
        let mut checkpoint = Checkpoint::new("community:1");
        checkpoint.record_page(Some("c1".to_string()), 20, 18);
        checkpoint.record_page(Some("c2".to_string()), 20, 20);

        assert_eq!(checkpoint.cursor.as_deref(), Some("c2"));
        assert_eq!(checkpoint.pages_fetched, 2);
        assert_eq!(checkpoint.total_fetched, 40);
        assert_eq!(checkpoint.new_records, 38);
        assert!(!checkpoint.is_exhausted());

        checkpoint.record_page(None, 3, 3);
        assert!(checkpoint.is_exhausted());
    }

    #[test]
    fn test_completion_ratio() {
        let mut checkpoint = Checkpoint::new("community:1");
        assert_eq!(checkpoint.completion_ratio(10), None);

        checkpoint.target_total = Some(200);
        assert_eq!(checkpoint.completion_ratio(50), Some(0.25));
        // Counts can exceed stale totals; the ratio saturates
        assert_eq!(checkpoint.completion_ratio(250), Some(1.0));

        checkpoint.target_total = Some(0);
        assert_eq!(checkpoint.completion_ratio(5), None);
    }

    #[test]
    fn test_update_progress() {
        let mut checkpoint = Checkpoint::new("community:1");
        checkpoint.target_total = Some(4);
        checkpoint.update_progress(1);
        assert_eq!(checkpoint.progress_percentage, Some(25.0));
    }

    #[test]
    fn test_json_uses_metadata_field_names() {
        let mut checkpoint = Checkpoint::new("community:1");
        checkpoint.record_page(Some("DAABCgAB".to_string()), 20, 20);

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["last_cursor"], "DAABCgAB");
        assert_eq!(json["collected_members"], 20);
        assert!(json.get("last_updated").is_some());
    }
}
