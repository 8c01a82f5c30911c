//! Rolling progress and ETA tracking for the page loop

use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent pages the average rate is computed over
pub const RATE_WINDOW: usize = 10;

/// Tracks per-page throughput over a rolling window
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    window: VecDeque<(usize, Duration)>,
    window_size: usize,
    pages: u64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(RATE_WINDOW)
    }
}

impl ProgressTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            pages: 0,
        }
    }

    /// Records one page that produced `records` in `elapsed`
    pub fn record_page(&mut self, records: usize, elapsed: Duration) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((records, elapsed));
        self.pages += 1;
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Records per second over the window, `None` before any measurable time
    pub fn average_rate(&self) -> Option<f64> {
        let records: usize = self.window.iter().map(|(r, _)| r).sum();
        let seconds: f64 = self.window.iter().map(|(_, d)| d.as_secs_f64()).sum();
        if seconds > 0.0 {
            Some(records as f64 / seconds)
        } else {
            None
        }
    }

    /// Estimated time to collect `remaining` more records
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.average_rate().filter(|r| *r > 0.0)?;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

/// Formats a duration as `45s`, `3.2m` or `1.5h`
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 60.0 {
        format!("{:.0}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}

/// Renders `[#####-----]` for a percentage in `0..=100`
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let mut tracker = ProgressTracker::new(2);
        tracker.record_page(100, Duration::from_secs(100));
        tracker.record_page(20, Duration::from_secs(1));
        tracker.record_page(20, Duration::from_secs(1));

        // The first slow page fell out of the window
        assert_eq!(tracker.average_rate(), Some(20.0));
        assert_eq!(tracker.pages(), 3);
    }

    #[test]
    fn test_eta() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.eta(100), None);

        tracker.record_page(10, Duration::from_secs(2));
        assert_eq!(tracker.eta(100), Some(Duration::from_secs(20)));

        let mut stalled = ProgressTracker::default();
        stalled.record_page(0, Duration::from_secs(2));
        assert_eq!(stalled.eta(100), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(192)), "3.2m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5h");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0, 4), "[----]");
        assert_eq!(progress_bar(50.0, 4), "[##--]");
        assert_eq!(progress_bar(250.0, 4), "[####]");
    }
}
