//! Statistics from a harvest's on-disk artifacts
//!
//! This module reads the checkpoint and the record set of a destination and
//! prints where a harvest stands, and prints the summary of a finished run.

use crate::harvest::{FollowCheckReport, HarvestOutcome, HarvestReport};
use crate::output::progress::{format_duration, progress_bar};
use crate::state::Checkpoint;
use crate::storage::{count_records, CheckpointStore, JsonCheckpointStore};
use crate::HarvestError;
use std::path::{Path, PathBuf};

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    pub records_path: PathBuf,
    pub checkpoint_path: PathBuf,

    /// Data rows currently in the record set
    pub records_on_disk: u64,

    /// Saved checkpoint, if any
    pub checkpoint: Option<Checkpoint>,
}

impl HarvestStatistics {
    /// Completion ratio against the known total, if any
    pub fn completion_ratio(&self) -> Option<f64> {
        self.checkpoint
            .as_ref()
            .and_then(|c| c.completion_ratio(self.records_on_disk))
    }

    /// Returns true if the saved cursor is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.checkpoint
            .as_ref()
            .map(Checkpoint::is_exhausted)
            .unwrap_or(false)
    }
}

/// Loads statistics for a destination
///
/// # Arguments
///
/// * `records_path` - The CSV record set
/// * `checkpoint_path` - The checkpoint document describing it
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - The record set or checkpoint could not be read
pub fn load_statistics(
    records_path: &Path,
    checkpoint_path: &Path,
) -> Result<HarvestStatistics, HarvestError> {
    let records_on_disk = count_records(records_path)?;
    let checkpoint = JsonCheckpointStore::at(checkpoint_path).load(records_path)?;

    Ok(HarvestStatistics {
        records_path: records_path.to_path_buf(),
        checkpoint_path: checkpoint_path.to_path_buf(),
        records_on_disk,
        checkpoint,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Records:");
    println!("  File: {}", stats.records_path.display());
    println!("  Records on disk: {}", stats.records_on_disk);
    println!();

    let Some(checkpoint) = &stats.checkpoint else {
        println!("No checkpoint at {}", stats.checkpoint_path.display());
        return;
    };

    println!("Checkpoint ({}):", stats.checkpoint_path.display());
    println!("  Collection: {}", checkpoint.collection);
    println!("  Pages fetched: {}", checkpoint.pages_fetched);
    println!("  Records fetched: {}", checkpoint.total_fetched);
    println!("  Records added: {}", checkpoint.new_records);
    println!("  Rate limit hits: {}", checkpoint.rate_limit_hits);
    println!("  Started: {}", checkpoint.started_at.to_rfc3339());
    println!("  Last updated: {}", checkpoint.last_updated_at.to_rfc3339());
    match &checkpoint.cursor {
        Some(cursor) => println!("  Next cursor: {}", cursor),
        None if stats.is_exhausted() => println!("  Next cursor: none (collection exhausted)"),
        None => println!("  Next cursor: none (not started)"),
    }
    println!();

    match (checkpoint.target_total, stats.completion_ratio()) {
        (Some(total), Some(ratio)) => println!(
            "Progress: {} {:.2}% ({}/{} records)",
            progress_bar(ratio * 100.0, 25),
            ratio * 100.0,
            stats.records_on_disk,
            total
        ),
        _ => println!("Progress: unknown (collection size not reported)"),
    }
}

/// Prints the summary of a finished run
pub fn print_summary(report: &HarvestReport) {
    println!("\n===== HARVEST SUMMARY =====");
    println!("Collection: {}", report.collection);
    println!("Outcome: {}", report.outcome);
    println!("Records collected this session: {}", report.records_added);
    if report.existing_records > 0 {
        println!("Existing records in file: {}", report.existing_records);
    }
    println!("Total records in file: {}", report.total_records);
    if report.duplicates > 0 || report.skipped > 0 {
        println!(
            "Duplicates dropped: {}, entries skipped: {}",
            report.duplicates, report.skipped
        );
    }
    println!("Data saved to {}", report.records_path.display());
    println!("Checkpoint saved to {}", report.checkpoint_path.display());

    let seconds = report.elapsed.as_secs_f64();
    println!("Total time: {}", format_duration(report.elapsed));
    if seconds > 0.0 && report.records_added > 0 {
        println!(
            "Average rate: {:.1} records/minute",
            report.records_added as f64 / seconds * 60.0
        );
    }
    if report.rate_limit_hits > 0 {
        println!("Rate limit hits: {}", report.rate_limit_hits);
    }
    if report.network_retries > 0 {
        println!("Network retries: {}", report.network_retries);
    }

    if let (Some(total), Some(ratio)) = (report.target_total, report.completion_ratio()) {
        println!(
            "Progress: {} {:.2}% ({}/{} records)",
            progress_bar(ratio * 100.0, 25),
            ratio * 100.0,
            report.total_records,
            total
        );
    }

    match (&report.final_cursor, report.outcome) {
        (Some(cursor), _) => {
            println!("\nLast cursor: {}", cursor);
            println!("Run again with --resume to continue from this point.");
        }
        (None, HarvestOutcome::AlreadyExhausted) => {
            println!("\nThe collection was already fully harvested.");
        }
        (None, _) => println!("\nThe collection is fully harvested."),
    }
}

/// Prints the summary of a finished follow check
pub fn print_follow_check_summary(report: &FollowCheckReport) {
    println!("\n===== FOLLOW CHECK SUMMARY =====");
    println!("Target: @{}", report.target);
    println!("Outcome: {}", report.outcome);
    println!("Members in list: {}", report.members_total);
    if report.already_checked > 0 {
        println!("Checked by earlier runs: {}", report.already_checked);
    }
    println!("Checked this session: {}", report.checked);
    println!("  Following: {}", report.followers);
    println!("  Not following: {}", report.non_followers);
    if report.unknown > 0 {
        println!("  Of which unknown: {}", report.unknown);
    }
    if report.skipped > 0 {
        println!("Rows without id or username: {}", report.skipped);
    }
    println!("Pages fetched: {}", report.pages_fetched);
    println!("Total time: {}", format_duration(report.elapsed));
    if report.rate_limit_hits > 0 {
        println!("Rate limit hits: {}", report.rate_limit_hits);
    }
    if report.network_retries > 0 {
        println!("Network retries: {}", report.network_retries);
    }
    for path in report.output.paths() {
        println!("Results saved to {}", path.display());
    }
    if report.outcome == HarvestOutcome::LimitReached {
        println!("\nRun again to check the remaining members.");
    }
}
