//! Follow check over a harvested member list
//!
//! For every member of a records file this pages through the member's
//! following list until the target account shows up or the list ends, and
//! records the answer keyed on the member's username. The results file is the
//! progress record: members already present in it are skipped, so an
//! interrupted check continues where it stopped.

use crate::adapter::{Adapter, FollowingAdapter, SalvagePolicy};
use crate::config::{Config, Credentials};
use crate::harvest::fetcher::PageFetcher;
use crate::harvest::orchestrator::HarvestOutcome;
use crate::harvest::retry::{BackoffPolicy, RateLimitController, TokioSleeper};
use crate::harvest::transport::ReqwestTransport;
use crate::output::progress::format_duration;
use crate::storage::{
    read_members, DuplicatePolicy, Member, Record, RecordSet, ResponseArchive, StorageResult,
};
use crate::{ConfigError, HarvestError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Columns of the combined results file
pub const RESULT_COLUMNS: &[&str] = &["id", "username", "follows_target"];

const USERNAME_COLUMNS: &[&str] = &["username"];

/// Answer recorded for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowStatus {
    Follows,
    NotFollowing,

    /// The member is the target account
    IsTarget,

    /// Protected accounts do not expose their following list
    Protected,

    /// The following list could not be read
    Unknown,
}

impl FollowStatus {
    /// Spelling used in the `follows_target` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follows => "Yes",
            Self::NotFollowing => "No",
            Self::IsTarget => "Self",
            Self::Protected => "Unknown (Protected)",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the member lands in the followers list
    pub fn is_follower(&self) -> bool {
        matches!(self, Self::Follows | Self::IsTarget)
    }
}

impl fmt::Display for FollowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalizes a target username: trims it and drops a leading `@`
pub fn normalize_target(target: &str) -> Result<String, ConfigError> {
    let name = target.trim().trim_start_matches('@');
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::Validation(format!(
            "target must be a username of letters, digits and underscores, got '{}'",
            target
        )));
    }
    Ok(name.to_string())
}

/// Where results are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowCheckOutput {
    /// One file with `id,username,follows_target`
    Combined(PathBuf),

    /// Two username lists
    Separate {
        followers: PathBuf,
        non_followers: PathBuf,
    },
}

impl FollowCheckOutput {
    /// Derives the output files from the member list's name
    ///
    /// `members.csv` checked against `alice` gives `members_follows_alice.csv`,
    /// or `members_following_alice.csv` plus `members_not_following_alice.csv`
    /// when separated. An explicit `output` replaces the combined file.
    pub fn for_members(members_path: &Path, target: &str, output: Option<&Path>, separate: bool) -> Self {
        let stem = members_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "members".to_string());
        let sibling = |name: String| members_path.with_file_name(name);

        if separate {
            return Self::Separate {
                followers: sibling(format!("{}_following_{}.csv", stem, target)),
                non_followers: sibling(format!("{}_not_following_{}.csv", stem, target)),
            };
        }

        match output {
            Some(path) => Self::Combined(path.to_path_buf()),
            None => Self::Combined(sibling(format!("{}_follows_{}.csv", stem, target))),
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Combined(path) => vec![path.clone()],
            Self::Separate {
                followers,
                non_followers,
            } => vec![followers.clone(), non_followers.clone()],
        }
    }
}

/// Open result files
enum ResultSink {
    Combined(RecordSet),
    Separate {
        followers: RecordSet,
        non_followers: RecordSet,
    },
}

impl ResultSink {
    fn open(output: &FollowCheckOutput) -> StorageResult<Self> {
        let policy = DuplicatePolicy::FirstWriteWins;

        Ok(match output {
            FollowCheckOutput::Combined(path) => {
                Self::Combined(RecordSet::open(path, RESULT_COLUMNS, 1, policy)?)
            }
            FollowCheckOutput::Separate {
                followers,
                non_followers,
            } => Self::Separate {
                followers: RecordSet::open(followers, USERNAME_COLUMNS, 0, policy)?,
                non_followers: RecordSet::open(non_followers, USERNAME_COLUMNS, 0, policy)?,
            },
        })
    }

    fn contains(&self, username: &str) -> bool {
        match self {
            Self::Combined(set) => set.contains(username),
            Self::Separate {
                followers,
                non_followers,
            } => followers.contains(username) || non_followers.contains(username),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Combined(set) => set.len(),
            Self::Separate {
                followers,
                non_followers,
            } => followers.len() + non_followers.len(),
        }
    }

    /// Appends one answer (fsynced before returning)
    fn record(&mut self, member: &Member, status: FollowStatus) -> StorageResult<()> {
        let username = member.username.clone();
        match self {
            Self::Combined(set) => {
                let fields = vec![member.id.clone(), username.clone(), status.to_string()];
                set.merge(vec![Record::new(username, fields)])?;
            }
            Self::Separate {
                followers,
                non_followers,
            } => {
                let set = if status.is_follower() {
                    followers
                } else {
                    non_followers
                };
                set.merge(vec![Record::new(username.clone(), vec![username])])?;
            }
        }
        Ok(())
    }
}

/// Per-run knobs of a follow check
#[derive(Debug, Clone)]
pub struct FollowCheckOptions {
    /// Username looked for, compared case-insensitively
    pub target: String,

    pub page_size: u32,

    /// Pages read per member before answering "No"
    pub max_pages: Option<u32>,

    /// Stop after checking this many members in this run
    pub limit: Option<u64>,

    /// Politeness delay between requests
    pub delay: Duration,

    pub salvage: SalvagePolicy,
}

impl FollowCheckOptions {
    pub fn from_config(config: &Config, target: &str) -> Self {
        Self {
            target: target.to_string(),
            page_size: config.follow_check.page_size,
            max_pages: config.follow_check.max_pages,
            limit: config.harvest.limit,
            delay: Duration::from_millis(config.harvest.page_delay_ms),
            salvage: config.follow_check.salvage,
        }
    }
}

/// Summary of one follow-check run
#[derive(Debug, Clone)]
pub struct FollowCheckReport {
    /// `Completed` or `LimitReached`
    pub outcome: HarvestOutcome,
    pub target: String,

    /// Rows in the member list
    pub members_total: u64,

    /// Members already answered by an earlier run
    pub already_checked: u64,

    /// Members answered in this run
    pub checked: u64,

    pub followers: u64,
    pub non_followers: u64,

    /// Answers of this run that are `Unknown` or `Unknown (Protected)`
    pub unknown: u64,

    /// Member rows without an id or username
    pub skipped: u64,

    pub pages_fetched: u64,
    pub rate_limit_hits: u64,
    pub network_retries: u64,
    pub elapsed: Duration,
    pub output: FollowCheckOutput,
}

impl FollowCheckReport {
    fn new(target: &str, output: FollowCheckOutput) -> Self {
        Self {
            outcome: HarvestOutcome::Completed,
            target: target.to_string(),
            members_total: 0,
            already_checked: 0,
            checked: 0,
            followers: 0,
            non_followers: 0,
            unknown: 0,
            skipped: 0,
            pages_fetched: 0,
            rate_limit_hits: 0,
            network_retries: 0,
            elapsed: Duration::ZERO,
            output,
        }
    }

    fn tally(&mut self, status: FollowStatus) {
        self.checked += 1;
        match status {
            FollowStatus::Follows | FollowStatus::IsTarget => self.followers += 1,
            FollowStatus::NotFollowing => self.non_followers += 1,
            FollowStatus::Protected | FollowStatus::Unknown => {
                self.non_followers += 1;
                self.unknown += 1;
            }
        }
    }
}

/// Checks which members of a records file follow one account
pub struct FollowChecker {
    controller: RateLimitController,
    base_url: String,
    members_path: PathBuf,
    output: FollowCheckOutput,
    options: FollowCheckOptions,
}

impl FollowChecker {
    /// Creates a checker from its collaborators
    ///
    /// # Arguments
    ///
    /// * `controller` - Fetcher wrapped in the backoff policy
    /// * `base_url` - Origin the following-list requests go to
    /// * `members_path` - Records file listing the members to check
    /// * `output` - Result files
    /// * `options` - Per-run knobs
    pub fn new(
        controller: RateLimitController,
        base_url: &str,
        members_path: impl Into<PathBuf>,
        output: FollowCheckOutput,
        options: FollowCheckOptions,
    ) -> Self {
        Self {
            controller,
            base_url: base_url.to_string(),
            members_path: members_path.into(),
            output,
            options,
        }
    }

    /// Wires the production collaborators; the member list is `records-path`
    pub fn from_config(
        config: &Config,
        credentials: Credentials,
        output: FollowCheckOutput,
        options: FollowCheckOptions,
    ) -> Result<Self, HarvestError> {
        let transport = ReqwestTransport::from_config(&config.session, credentials)?;
        let archive = ResponseArchive::new(&config.output.archive_dir)?;
        let controller = RateLimitController::new(
            PageFetcher::new(Arc::new(transport), archive),
            BackoffPolicy::from_config(&config.retry),
            Arc::new(TokioSleeper),
        );

        Ok(Self::new(
            controller,
            &config.session.base_url,
            config.records_path(),
            output,
            options,
        ))
    }

    /// Checks every member not answered yet
    ///
    /// # Returns
    ///
    /// * `Ok(FollowCheckReport)` - Every member answered, or the limit was met
    /// * `Err(HarvestError)` - A fatal error; answers recorded so far are kept
    pub async fn run(&self) -> Result<FollowCheckReport, HarvestError> {
        let started = Instant::now();
        let target = &self.options.target;
        let members = read_members(&self.members_path)?;
        let mut sink = ResultSink::open(&self.output)?;
        let mut report = FollowCheckReport::new(target, self.output.clone());
        report.members_total = members.len() as u64;

        tracing::info!(
            "Checking {} members of {} for @{}",
            members.len(),
            self.members_path.display(),
            target
        );
        if sink.len() > 0 {
            tracing::info!("{} members were already checked; skipping them", sink.len());
        }

        let mut requested = false;
        for (index, member) in members.iter().enumerate() {
            if member.id.is_empty() || member.username.is_empty() {
                tracing::warn!("Skipping member row {} without id or username", index + 1);
                report.skipped += 1;
                continue;
            }
            if sink.contains(&member.username) {
                report.already_checked += 1;
                continue;
            }
            if let Some(limit) = self.options.limit {
                if report.checked >= limit {
                    tracing::info!("Reached limit of {} checked members", limit);
                    report.outcome = HarvestOutcome::LimitReached;
                    break;
                }
            }

            let status = if member.username.eq_ignore_ascii_case(target) {
                FollowStatus::IsTarget
            } else if member.protected {
                FollowStatus::Protected
            } else {
                if requested {
                    self.controller.sleeper().sleep(self.options.delay).await;
                }
                requested = true;
                match self.check_member(member, &mut report).await {
                    Ok(status) => status,
                    Err(e @ HarvestError::MalformedResponse { .. })
                    | Err(e @ HarvestError::Rejected { .. }) => {
                        tracing::warn!("Could not read @{}'s following list: {}", member.username, e);
                        FollowStatus::Unknown
                    }
                    Err(e) => return Err(e),
                }
            };

            sink.record(member, status)?;
            report.tally(status);
            tracing::info!(
                "@{} ({}/{}): {}",
                member.username,
                index + 1,
                members.len(),
                status
            );
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "Follow check {} after {}: {} checked, {} following @{}",
            report.outcome,
            format_duration(report.elapsed),
            report.checked,
            report.followers,
            target
        );
        Ok(report)
    }

    /// Pages through one member's following list looking for the target
    async fn check_member(
        &self,
        member: &Member,
        report: &mut FollowCheckReport,
    ) -> Result<FollowStatus, HarvestError> {
        let adapter = FollowingAdapter::new(&self.base_url, &member.id)
            .with_page_size(self.options.page_size)
            .with_salvage(self.options.salvage);
        let username_column = adapter
            .columns()
            .iter()
            .position(|c| *c == "username")
            .unwrap_or(1);

        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let request = adapter.build_request(cursor.as_deref(), None);
            let controlled = self
                .controller
                .execute(&request, adapter.archive_prefix(), |body| {
                    adapter.parse_response(body)
                })
                .await?;
            pages += 1;
            report.pages_fetched += 1;
            report.rate_limit_hits += u64::from(controlled.rate_limit_hits);
            report.network_retries += u64::from(controlled.network_retries);

            let page = controlled.value;
            let found = page.records.iter().any(|record| {
                record
                    .fields
                    .get(username_column)
                    .map_or(false, |name| name.eq_ignore_ascii_case(&self.options.target))
            });
            if found {
                return Ok(FollowStatus::Follows);
            }

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(FollowStatus::NotFollowing),
            }
            if self.options.max_pages.map_or(false, |max| pages >= max) {
                tracing::debug!("Stopped after {} pages of @{}'s following list", pages, member.username);
                return Ok(FollowStatus::NotFollowing);
            }

            self.controller.sleeper().sleep(self.options.delay).await;
        }
    }
}

/// Loads everything a config describes and runs one follow check
pub async fn run_follow_check(
    config: &Config,
    credentials: Credentials,
    output: FollowCheckOutput,
    options: FollowCheckOptions,
) -> Result<FollowCheckReport, HarvestError> {
    FollowChecker::from_config(config, credentials, output, options)?
        .run()
        .await
}
