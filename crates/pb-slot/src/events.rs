//! Machine events published by the orchestrator

use serde::{Deserialize, Serialize};

/// Analytics record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A play started
    Spin { story_id: String, storyline: String },
    /// Content was skipped before its story played
    StoryCancelled { story_id: String, storyline: String },
    /// Story playback began after a win
    StoryPlayed { story_id: String, storyline: String },
}

/// Lifecycle notifications for presentation and analytics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineEvent {
    SpinStarted { spin_id: u64 },
    ContentAdvanced { story_id: String, storyline: String },
    ReelStopped { reel: usize, index: usize },
    Won { story_id: String },
    Lost,
    Telemetry(TelemetryEvent),
}
