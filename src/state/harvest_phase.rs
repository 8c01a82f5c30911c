/// Harvest phase definitions for the orchestrator state machine
///
/// A run moves `Init → LoadCheckpoint → FetchPage ⇄ MergeAndPersist → Done → FinalizeStats`.
use std::fmt;

/// Represents the current phase of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestPhase {
    // ===== Setup =====
    /// Record set opened, nothing loaded yet
    Init,

    /// Loading (or creating) the checkpoint and the optional target total
    LoadCheckpoint,

    // ===== Page Loop =====
    /// One page request is in flight (including its retries)
    FetchPage,

    /// Merging the parsed batch into the record set and saving the checkpoint
    MergeAndPersist,

    // ===== Termination =====
    /// Cursor exhausted, limit reached or run stalled
    Done,

    /// Final statistics computed; the run is over
    FinalizeStats,
}

impl HarvestPhase {
    /// Returns true if the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: HarvestPhase) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::LoadCheckpoint)
                | (Self::LoadCheckpoint, Self::FetchPage)
                | (Self::LoadCheckpoint, Self::Done)
                | (Self::FetchPage, Self::MergeAndPersist)
                | (Self::MergeAndPersist, Self::FetchPage)
                | (Self::MergeAndPersist, Self::Done)
                | (Self::Done, Self::FinalizeStats)
        )
    }

    /// Returns true once no further pages may be fetched
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::FinalizeStats)
    }

    /// Returns true while the page loop is running
    pub fn is_looping(&self) -> bool {
        matches!(self, Self::FetchPage | Self::MergeAndPersist)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LoadCheckpoint => "load_checkpoint",
            Self::FetchPage => "fetch_page",
            Self::MergeAndPersist => "merge_and_persist",
            Self::Done => "done",
            Self::FinalizeStats => "finalize_stats",
        }
    }
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
