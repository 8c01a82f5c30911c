//! Harvest engine
//!
//! This module contains the pagination engine:
//! - `transport`: one HTTP call per request
//! - `fetcher`: archiving and outcome classification
//! - `retry`: backoff policy and the rate-limit controller
//! - `orchestrator`: the checkpointed fetch/merge loop
//! - `follow_check`: which members of a records file follow one account

mod fetcher;
mod follow_check;
mod orchestrator;
mod retry;
mod transport;

pub use fetcher::{parse_wait_hint, FetchOutcome, PageFetcher};
pub use follow_check::{
    normalize_target, run_follow_check, FollowCheckOptions, FollowCheckOutput, FollowCheckReport,
    FollowChecker, FollowStatus,
};
pub use orchestrator::{run_harvest, HarvestOptions, HarvestOutcome, HarvestReport, Harvester};
pub use retry::{
    BackoffPolicy, Controlled, RateLimitController, RecordingSleeper, Sleeper, TokioSleeper,
};
pub use transport::{build_http_client, RawResponse, ReqwestTransport, Transport, TransportError};
