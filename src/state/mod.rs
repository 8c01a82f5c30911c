//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `Checkpoint`: durable pagination progress for one output destination
//! - `HarvestPhase`: the orchestrator's state machine

mod checkpoint;
mod harvest_phase;

// Re-export main types
pub use checkpoint::Checkpoint;
pub use harvest_phase::HarvestPhase;
