//! # pb-slot: PowerBag Slot Core
//!
//! Decides every play, drives the reels onto the chosen combination and
//! tells the cabinet what happened.
//!
//! ## Architecture
//!
//! ```text
//! SlotMachine (one play at a time)
//!     │
//!     v
//! SpinOrchestrator ──> OutcomeEngine (cadence + stop targets)
//!     │         │
//!     │         └────> ContentSource / StoryCatalog (next story + layout)
//!     v
//! ReelController × N <── ProgressSample (watch) ── ReelSurface
//!     │
//!     v
//! SignalDispatcher (pb-link) ──> cabinet
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod outcome;
pub mod reel;

pub use catalog::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use orchestrator::*;
pub use outcome::*;
pub use reel::*;
