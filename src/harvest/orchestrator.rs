//! Harvest orchestrator - the resumable pagination loop
//!
//! This module drives one harvest run:
//! - Opening the record set and loading (or discarding) the checkpoint
//! - Fetching the optional collection total
//! - Fetching, merging and checkpointing page after page
//! - Stopping on an exhausted cursor, the item limit or a stall
//!
//! The checkpoint is saved after every merged page, before the next fetch
//! starts, so an interrupted run resumes from the cursor returned by the last
//! persisted page.

use crate::adapter::{build_adapter, Adapter, SalvagePolicy};
use crate::config::{Config, Credentials};
use crate::harvest::fetcher::PageFetcher;
use crate::harvest::retry::{BackoffPolicy, RateLimitController, TokioSleeper};
use crate::harvest::transport::ReqwestTransport;
use crate::output::progress::{format_duration, ProgressTracker};
use crate::state::{Checkpoint, HarvestPhase};
use crate::storage::{
    CheckpointStore, DuplicatePolicy, JsonCheckpointStore, RecordSet, ResponseArchive, StorageError,
};
use crate::{ConfigError, HarvestError};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-run knobs
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Stop after this many new records were added in this run
    pub limit: Option<u64>,

    /// Continue from the saved checkpoint instead of the first page
    pub resume: bool,

    /// Replace an unreadable checkpoint with a fresh one instead of failing
    pub discard_corrupt_checkpoint: bool,

    /// Issue the adapter's info request before paging
    pub fetch_info: bool,

    /// Politeness delay between pages
    pub page_delay: Duration,

    /// Consecutive pages without records tolerated before stopping
    pub max_empty_pages: u32,

    /// Hash of the config file, stored in the checkpoint
    pub config_hash: Option<String>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            limit: None,
            resume: false,
            discard_corrupt_checkpoint: false,
            fetch_info: true,
            page_delay: Duration::from_millis(1000),
            max_empty_pages: 3,
            config_hash: None,
        }
    }
}

impl HarvestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: config.harvest.limit,
            fetch_info: config.collection.fetch_info(),
            page_delay: Duration::from_millis(config.harvest.page_delay_ms),
            max_empty_pages: config.harvest.max_empty_pages,
            ..Self::default()
        }
    }
}

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// The cursor ran out
    Completed,

    /// The item limit was met
    LimitReached,

    /// The checkpoint was already exhausted; nothing was fetched
    AlreadyExhausted,

    /// Too many consecutive pages without records
    Stalled,
}

impl HarvestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::LimitReached => "limit_reached",
            Self::AlreadyExhausted => "already_exhausted",
            Self::Stalled => "stalled",
        }
    }

    /// Process exit status for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Stalled => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for HarvestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub outcome: HarvestOutcome,
    pub collection: String,

    /// Pages merged in this run
    pub pages_fetched: u64,

    /// Records parsed in this run, duplicates included
    pub records_fetched: u64,

    /// Records appended in this run
    pub records_added: u64,

    pub duplicates: u64,
    pub refreshed: u64,

    /// Entries dropped by salvage or for lacking an identity key
    pub skipped: u64,

    pub rate_limit_hits: u64,
    pub network_retries: u64,

    /// Records on disk when the run started
    pub existing_records: u64,

    /// Records on disk when the run ended
    pub total_records: u64,

    pub target_total: Option<u64>,
    pub final_cursor: Option<String>,
    pub elapsed: Duration,
    pub records_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl HarvestReport {
    fn new(outcome: HarvestOutcome, collection: String, records_path: PathBuf, checkpoint_path: PathBuf) -> Self {
        Self {
            outcome,
            collection,
            pages_fetched: 0,
            records_fetched: 0,
            records_added: 0,
            duplicates: 0,
            refreshed: 0,
            skipped: 0,
            rate_limit_hits: 0,
            network_retries: 0,
            existing_records: 0,
            total_records: 0,
            target_total: None,
            final_cursor: None,
            elapsed: Duration::ZERO,
            records_path,
            checkpoint_path,
        }
    }

    /// Share of the expected collection present on disk, if the total is known
    pub fn completion_ratio(&self) -> Option<f64> {
        match self.target_total {
            Some(total) if total > 0 => Some((self.total_records as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Drives a single harvest run
pub struct Harvester {
    adapter: Box<dyn Adapter>,
    controller: RateLimitController,
    store: Box<dyn CheckpointStore>,
    records_path: PathBuf,
    duplicate_policy: DuplicatePolicy,
    options: HarvestOptions,
    phase: HarvestPhase,
}

impl Harvester {
    /// Creates a harvester from its collaborators
    ///
    /// # Arguments
    ///
    /// * `adapter` - Request builder and parser for the collection
    /// * `controller` - Fetcher wrapped in the backoff policy
    /// * `store` - Checkpoint backend
    /// * `records_path` - CSV record set; also identifies the checkpoint
    /// * `duplicate_policy` - Behaviour on re-encountering a stored key
    /// * `options` - Per-run knobs
    pub fn new(
        adapter: Box<dyn Adapter>,
        controller: RateLimitController,
        store: Box<dyn CheckpointStore>,
        records_path: impl Into<PathBuf>,
        duplicate_policy: DuplicatePolicy,
        options: HarvestOptions,
    ) -> Self {
        Self {
            adapter,
            controller,
            store,
            records_path: records_path.into(),
            duplicate_policy,
            options,
            phase: HarvestPhase::Init,
        }
    }

    /// Wires the production collaborators described by a config
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client or archive directory could not be set up
    pub fn from_config(
        config: &Config,
        credentials: Credentials,
        options: HarvestOptions,
    ) -> Result<Self, HarvestError> {
        let adapter = build_adapter(&config.collection, &config.session.base_url);
        let transport = ReqwestTransport::from_config(&config.session, credentials)?;
        let archive = ResponseArchive::new(&config.output.archive_dir)?;
        let controller = RateLimitController::new(
            PageFetcher::new(Arc::new(transport), archive),
            BackoffPolicy::from_config(&config.retry),
            Arc::new(TokioSleeper),
        );
        let store = JsonCheckpointStore::at(config.checkpoint_path());

        Ok(Self::new(
            adapter,
            controller,
            Box::new(store),
            config.records_path(),
            config.harvest.duplicate_policy,
            options,
        ))
    }

    pub fn phase(&self) -> HarvestPhase {
        self.phase
    }

    fn transition(&mut self, next: HarvestPhase) -> Result<(), HarvestError> {
        if !self.phase.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Runs the harvest to completion
    ///
    /// # Loop
    ///
    /// 1. Build the request for the current cursor
    /// 2. Fetch it through the rate-limit controller
    /// 3. Merge the records into the record set (appended and fsynced)
    /// 4. Save the checkpoint with the new cursor
    /// 5. Stop if the cursor is gone, the limit is met or the run stalled
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestReport)` - The run ended normally
    /// * `Err(HarvestError)` - A fatal error; checkpoint and records keep the last merged page
    pub async fn run(&mut self) -> Result<HarvestReport, HarvestError> {
        let started = Instant::now();
        let collection = self.adapter.label();
        let checkpoint_path = self.store.location(&self.records_path);

        self.transition(HarvestPhase::LoadCheckpoint)?;

        let mut records = RecordSet::open(
            &self.records_path,
            self.adapter.columns(),
            self.adapter.key_column(),
            self.duplicate_policy,
        )?;
        let mut checkpoint = self.load_checkpoint(&collection)?;
        checkpoint.existing_records = records.existing_count() as u64;
        if self.options.config_hash.is_some() {
            checkpoint.config_hash = self.options.config_hash.clone();
        }

        let mut report = HarvestReport::new(
            HarvestOutcome::Completed,
            collection.clone(),
            self.records_path.clone(),
            checkpoint_path,
        );
        report.existing_records = records.existing_count() as u64;

        if checkpoint.is_exhausted() {
            tracing::info!(
                "Collection {} was already fully harvested ({} pages); nothing to fetch",
                collection,
                checkpoint.pages_fetched
            );
            return self.finish(report, HarvestOutcome::AlreadyExhausted, &checkpoint, &records, started);
        }

        if self.options.fetch_info {
            if let Some(total) = self.fetch_target_total(&mut report).await? {
                checkpoint.target_total = Some(total);
            }
        }

        tracing::info!(
            "Harvesting {} (target: {}, limit: {}, starting {})",
            collection,
            checkpoint
                .target_total
                .map_or_else(|| "unknown".to_string(), |t| t.to_string()),
            self.options
                .limit
                .map_or_else(|| "none".to_string(), |l| l.to_string()),
            if checkpoint.cursor.is_some() {
                "from saved cursor"
            } else {
                "from the first page"
            }
        );

        if self.adapter.salvage_policy() == SalvagePolicy::SkipEntries {
            tracing::warn!("Unparseable entries will be skipped instead of failing the page");
        }

        let mut tracker = ProgressTracker::default();
        let mut empty_streak = 0u32;

        let outcome = loop {
            if self.limit_reached(report.records_added) {
                break HarvestOutcome::LimitReached;
            }

            let page_started = Instant::now();
            self.transition(HarvestPhase::FetchPage)?;

            let remaining = self
                .options
                .limit
                .map(|limit| limit.saturating_sub(report.records_added));
            let request = self
                .adapter
                .build_request(checkpoint.cursor.as_deref(), remaining);
            let adapter = &self.adapter;
            let controlled = self
                .controller
                .execute(&request, adapter.archive_prefix(), |body| {
                    adapter.parse_response(body)
                })
                .await?;

            self.transition(HarvestPhase::MergeAndPersist)?;

            let page = controlled.value;
            checkpoint.record_rate_limit_hits(controlled.rate_limit_hits);
            report.rate_limit_hits += u64::from(controlled.rate_limit_hits);
            report.network_retries += u64::from(controlled.network_retries);

            if checkpoint.target_total.is_none() {
                checkpoint.target_total = page.total_count;
            }

            let fetched = page.records.len();
            let salvaged = page.skipped;
            let merge = records.merge(page.records)?;

            let mut next_cursor = page.next_cursor;
            if next_cursor.is_some() && next_cursor == checkpoint.cursor {
                tracing::warn!("Cursor did not advance; treating the collection as exhausted");
                next_cursor = None;
            }

            checkpoint.record_page(next_cursor, fetched, merge.added.len());
            checkpoint.update_progress(records.len() as u64);
            self.store.save(&self.records_path, &checkpoint)?;

            report.pages_fetched += 1;
            report.records_fetched += fetched as u64;
            report.records_added += merge.added.len() as u64;
            report.duplicates += merge.duplicates as u64;
            report.refreshed += merge.refreshed as u64;
            report.skipped += (merge.skipped + salvaged) as u64;

            tracker.record_page(merge.added.len(), page_started.elapsed());
            self.log_progress(&tracker, &checkpoint, &records, fetched, &merge);

            if fetched == 0 && salvaged == 0 {
                empty_streak += 1;
            } else {
                empty_streak = 0;
            }

            if checkpoint.cursor.is_none() {
                tracing::info!("No more pages to fetch");
                break HarvestOutcome::Completed;
            }
            if self.limit_reached(report.records_added) {
                break HarvestOutcome::LimitReached;
            }
            if empty_streak >= self.options.max_empty_pages {
                tracing::warn!(
                    "{} consecutive pages without records; stopping with the checkpoint intact",
                    empty_streak
                );
                break HarvestOutcome::Stalled;
            }

            self.controller.sleeper().sleep(self.options.page_delay).await;
        };

        self.finish(report, outcome, &checkpoint, &records, started)
    }

    fn limit_reached(&self, added: u64) -> bool {
        match self.options.limit {
            Some(limit) if added >= limit => {
                tracing::info!("Reached limit of {} new records", limit);
                true
            }
            _ => false,
        }
    }

    fn finish(
        &mut self,
        mut report: HarvestReport,
        outcome: HarvestOutcome,
        checkpoint: &Checkpoint,
        records: &RecordSet,
        started: Instant,
    ) -> Result<HarvestReport, HarvestError> {
        self.transition(HarvestPhase::Done)?;

        report.outcome = outcome;
        report.total_records = records.len() as u64;
        report.target_total = checkpoint.target_total;
        report.final_cursor = checkpoint.cursor.clone();
        report.elapsed = started.elapsed();

        self.transition(HarvestPhase::FinalizeStats)?;
        tracing::info!(
            "Harvest {} after {}: {} new records in {} pages, {} total",
            outcome,
            format_duration(report.elapsed),
            report.records_added,
            report.pages_fetched,
            report.total_records
        );
        Ok(report)
    }

    /// Produces the checkpoint this run starts from
    fn load_checkpoint(&mut self, collection: &str) -> Result<Checkpoint, HarvestError> {
        let fresh = || {
            let mut checkpoint = Checkpoint::new(collection);
            checkpoint.config_hash = self.options.config_hash.clone();
            checkpoint
        };

        if !self.options.resume {
            tracing::info!("Starting from the first page");
            return Ok(fresh());
        }

        let loaded = match self.store.load(&self.records_path) {
            Ok(loaded) => loaded,
            Err(StorageError::CheckpointCorrupt { path, reason }) if self.options.discard_corrupt_checkpoint => {
                tracing::warn!(
                    "Discarding corrupt checkpoint {} ({}); starting from the first page",
                    path.display(),
                    reason
                );
                self.store.clear(&self.records_path)?;
                return Ok(fresh());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(checkpoint) = loaded else {
            tracing::info!("No checkpoint found; starting from the first page");
            return Ok(fresh());
        };

        if checkpoint.collection != collection {
            return Err(HarvestError::Config(ConfigError::Validation(format!(
                "checkpoint {} belongs to {}, not {}",
                self.store.location(&self.records_path).display(),
                checkpoint.collection,
                collection
            ))));
        }

        if let (Some(saved), Some(current)) = (&checkpoint.config_hash, &self.options.config_hash) {
            if saved != current {
                tracing::warn!("Config file changed since the checkpoint was written");
            }
        }

        tracing::info!(
            "Resuming {} after {} pages ({} records fetched so far)",
            collection,
            checkpoint.pages_fetched,
            checkpoint.total_fetched
        );
        Ok(checkpoint)
    }

    /// Runs the adapter's info request
    ///
    /// Only authentication and archive failures are fatal; anything else
    /// leaves the total unknown.
    async fn fetch_target_total(&self, report: &mut HarvestReport) -> Result<Option<u64>, HarvestError> {
        let Some(request) = self.adapter.info_request() else {
            return Ok(None);
        };

        let adapter = &self.adapter;
        match self
            .controller
            .execute(&request, adapter.info_archive_prefix(), |body| {
                adapter.parse_info(body)
            })
            .await
        {
            Ok(controlled) => {
                report.rate_limit_hits += u64::from(controlled.rate_limit_hits);
                report.network_retries += u64::from(controlled.network_retries);
                Ok(controlled.value)
            }
            Err(e @ HarvestError::AuthFailure { .. }) | Err(e @ HarvestError::Storage(_)) => Err(e),
            Err(e) => {
                tracing::warn!("Could not fetch collection info: {}", e);
                Ok(None)
            }
        }
    }

    fn log_progress(
        &self,
        tracker: &ProgressTracker,
        checkpoint: &Checkpoint,
        records: &RecordSet,
        fetched: usize,
        merge: &crate::storage::MergeResult,
    ) {
        tracing::info!(
            "Page {}: {} fetched, {} new, {} duplicates ({} records on disk)",
            checkpoint.pages_fetched,
            fetched,
            merge.added.len(),
            merge.duplicates,
            records.len()
        );

        let Some(rate) = tracker.average_rate() else {
            return;
        };
        match checkpoint.target_total {
            Some(total) => {
                let remaining = total.saturating_sub(records.len() as u64);
                let eta = tracker
                    .eta(remaining)
                    .map_or_else(|| "unknown".to_string(), format_duration);
                tracing::info!(
                    "Progress: {:.1}% | {:.1} records/sec | ETA {}",
                    checkpoint.progress_percentage.unwrap_or(0.0),
                    rate,
                    eta
                );
            }
            None => tracing::info!("Rate: {:.1} records/sec", rate),
        }
    }
}

/// Loads everything a config describes and runs one harvest
///
/// # Example
///
/// ```no_run
/// use ripple_harvest::config::{load_config, Credentials};
/// use ripple_harvest::{run_harvest, HarvestOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let credentials = Credentials::from_env(&config.session)?;
/// let options = HarvestOptions {
///     resume: true,
///     ..HarvestOptions::from_config(&config)
/// };
/// let report = run_harvest(&config, credentials, options).await?;
/// println!("{} new records", report.records_added);
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(
    config: &Config,
    credentials: Credentials,
    options: HarvestOptions,
) -> Result<HarvestReport, HarvestError> {
    let mut harvester = Harvester::from_config(config, credentials, options)?;
    harvester.run().await
}
