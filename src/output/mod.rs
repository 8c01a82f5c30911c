//! Output module for harvest progress and reports
//!
//! This module handles:
//! - Rolling rate and ETA tracking while the page loop runs
//! - Statistics read back from a destination's checkpoint and record set
//! - The summaries printed after a harvest or follow check

pub mod progress;
pub mod stats;

pub use progress::{format_duration, progress_bar, ProgressTracker};
pub use stats::{
    load_statistics, print_follow_check_summary, print_statistics, print_summary,
    HarvestStatistics,
};
