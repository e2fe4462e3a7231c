//! Error types for the slot core
//!
//! Everything here is a contract violation between the orchestrator and its
//! collaborators. Hardware trouble never surfaces as a `SlotError`.

use thiserror::Error;

/// Slot core error
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Reel {reel} has no items")]
    EmptyReel { reel: usize },

    #[error("Stop target {target} out of range for reel {reel} ({len} items)")]
    TargetOutOfRange { reel: usize, target: usize, len: usize },

    #[error("Reel {reel} is not spinning")]
    NotSpinning { reel: usize },

    #[error("Expected {expected} reels, got {actual}")]
    ReelCountMismatch { expected: usize, actual: usize },

    #[error("Winning bag {bag_id} not found on reel {reel}")]
    WinningBagMissing { reel: usize, bag_id: String },

    #[error("Winning index {index} out of range for reel {reel} ({len} items)")]
    WinningIndexOutOfRange { reel: usize, index: usize, len: usize },

    #[error("Content catalog has no playable stories")]
    EmptyCatalog,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type SlotResult<T> = Result<T, SlotError>;
