//! Reel Controller: stop a looping reel on a chosen bag
//!
//! The presentation surface scrolls the reel continuously and publishes
//! progress samples (per-item snap positions plus the current normalized
//! progress). A stop request watches those samples until the reel is just
//! short of the target slot, then halts motion and snaps onto it.
//!
//! ```text
//! Idle ──spin──> Spinning ──stop(t)──> StopRequested ──sample ok / fallback──> Stopped
//!                   ^                                                            │
//!                   └─────────────────────────spin───────────────────────────────┘
//! ```

mod sim;

pub use sim::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::catalog::Bag;
use crate::config::ReelConfig;
use crate::error::{SlotError, SlotResult};

/// Scrolling surface for one reel (presentation collaborator)
pub trait ReelSurface: Send + Sync {
    /// Replace the item sequence
    fn load(&self, items: &[Bag]);

    /// Begin continuous looping motion
    fn start_motion(&self);

    /// Halt continuous motion where it is
    fn halt_motion(&self);

    /// Jump to the slot of `index`
    fn scroll_to(&self, index: usize);

    /// Whether continuous motion is active
    fn is_moving(&self) -> bool;
}

/// One progress notification from the surface
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Normalized snap position of every item in the loop
    pub snap_positions: Arc<[f64]>,
    /// Current normalized scroll progress
    pub progress: f64,
}

impl Default for ProgressSample {
    fn default() -> Self {
        Self {
            snap_positions: Arc::from(Vec::new()),
            progress: 0.0,
        }
    }
}

/// Reel lifecycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReelState {
    Idle,
    Spinning,
    StopRequested { target: usize, requested_at: Instant },
    Stopped { index: usize },
}

/// Per-sample stop verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// Keep scrolling
    Hold,
    /// Reel is within the tolerance band short of the target
    Converged,
    /// Gave up waiting for convergence
    Fallback,
}

/// Decide whether a sample lets the reel stop on `target`
pub fn evaluate_stop(
    sample: &ProgressSample,
    target: usize,
    elapsed: Duration,
    config: &ReelConfig,
) -> StopDecision {
    if elapsed > config.fallback_after() {
        return StopDecision::Fallback;
    }

    let Some(&aim) = sample.snap_positions.get(target) else {
        return StopDecision::Hold;
    };
    // A zero aim (including -0.0) would never be approached from below
    let aim = if aim.abs() < f64::EPSILON { config.zero_aim } else { aim };
    let tolerance = config.tolerance_for(sample.snap_positions.len());

    if sample.progress < aim && aim - sample.progress <= tolerance {
        StopDecision::Converged
    } else {
        StopDecision::Hold
    }
}

/// Drives one reel
pub struct ReelController {
    index: usize,
    item_count: usize,
    surface: Arc<dyn ReelSurface>,
    samples: watch::Receiver<ProgressSample>,
    state: ReelState,
    config: ReelConfig,
    last_stop: Option<StopDecision>,
}

impl ReelController {
    pub fn new(
        index: usize,
        surface: Arc<dyn ReelSurface>,
        samples: watch::Receiver<ProgressSample>,
        config: ReelConfig,
    ) -> Self {
        Self {
            index,
            item_count: 0,
            surface,
            samples,
            state: ReelState::Idle,
            config,
            last_stop: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn state(&self) -> ReelState {
        self.state
    }

    /// How the most recent stop resolved
    pub fn last_stop(&self) -> Option<StopDecision> {
        self.last_stop
    }

    /// Load a new item sequence onto the surface
    pub fn load(&mut self, items: &[Bag]) {
        if self.is_spinning() {
            log::warn!("[Reel {}] Loading items while spinning", self.index);
        }
        self.surface.load(items);
        self.item_count = items.len();
    }

    /// Start continuous motion
    pub fn spin(&mut self) {
        if self.is_spinning() {
            log::debug!("[Reel {}] Already spinning", self.index);
            return;
        }
        self.surface.start_motion();
        self.state = ReelState::Spinning;
    }

    /// Whether the reel is spinning with motion active
    pub fn is_spinning(&self) -> bool {
        matches!(self.state, ReelState::Spinning) && self.surface.is_moving()
    }

    /// Stop on `target`, resolving once the reel has halted there
    pub async fn stop(&mut self, target: usize) -> SlotResult<bool> {
        if self.item_count == 0 {
            return Err(SlotError::EmptyReel { reel: self.index });
        }
        if target >= self.item_count {
            return Err(SlotError::TargetOutOfRange {
                reel: self.index,
                target,
                len: self.item_count,
            });
        }
        if !matches!(self.state, ReelState::Spinning) {
            return Err(SlotError::NotSpinning { reel: self.index });
        }

        let requested_at = Instant::now();
        self.state = ReelState::StopRequested { target, requested_at };
        self.samples.borrow_and_update();

        let deadline = requested_at + self.config.fallback_after();
        let decision = loop {
            match tokio::time::timeout_at(deadline, self.samples.changed()).await {
                Ok(Ok(())) => {
                    let sample = self.samples.borrow_and_update().clone();
                    match evaluate_stop(&sample, target, requested_at.elapsed(), &self.config) {
                        StopDecision::Hold => continue,
                        decision => break decision,
                    }
                }
                Ok(Err(_)) => {
                    log::warn!("[Reel {}] Sample stream closed during stop", self.index);
                    break StopDecision::Fallback;
                }
                Err(_) => break StopDecision::Fallback,
            }
        };

        if decision == StopDecision::Fallback {
            log::info!(
                "[Reel {}] Stop fallback after {}ms; snapping to {}",
                self.index,
                requested_at.elapsed().as_millis(),
                target
            );
        }

        self.surface.halt_motion();
        self.surface.scroll_to(target);
        self.state = ReelState::Stopped { index: target };
        self.last_stop = Some(decision);

        log::debug!("[Reel {}] Stopped at {} ({:?})", self.index, target, decision);
        Ok(true)
    }
}
