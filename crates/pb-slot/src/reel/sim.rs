//! Simulated reel surface
//!
//! Scrolls a virtual loop on a tokio interval and publishes progress samples
//! the same way a rendered carousel would. Used headless and in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{ProgressSample, ReelSurface};
use crate::catalog::Bag;

/// Simulated motion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Scroll speed in items per second
    pub items_per_second: f64,
    /// Sample interval (ms)
    pub tick_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            items_per_second: 8.0,
            tick_ms: 16,
        }
    }
}

struct Motion {
    progress: f64,
    snap_positions: Arc<[f64]>,
}

pub struct SimulatedReel {
    moving: AtomicBool,
    motion: Mutex<Motion>,
    samples: watch::Sender<ProgressSample>,
    config: SimConfig,
}

impl SimulatedReel {
    /// Create the reel and start its ticker on the current runtime
    pub fn spawn(config: SimConfig) -> (Arc<Self>, watch::Receiver<ProgressSample>) {
        let (samples, rx) = watch::channel(ProgressSample::default());
        let tick = Duration::from_millis(config.tick_ms.max(1));

        let reel = Arc::new(Self {
            moving: AtomicBool::new(false),
            motion: Mutex::new(Motion {
                progress: 0.0,
                snap_positions: Arc::from(Vec::new()),
            }),
            samples,
            config,
        });

        tokio::spawn(run_ticker(Arc::downgrade(&reel), tick));
        (reel, rx)
    }

    pub fn progress(&self) -> f64 {
        self.motion.lock().progress
    }

    /// Slot the reel rests on, if halted exactly on one
    pub fn resting_index(&self) -> Option<usize> {
        if self.is_moving() {
            return None;
        }
        let motion = self.motion.lock();
        motion
            .snap_positions
            .iter()
            .position(|&snap| (snap - motion.progress).abs() < 1e-9)
    }

    fn advance(&self, dt: Duration) {
        if !self.moving.load(Ordering::Acquire) {
            return;
        }
        let sample = {
            let mut motion = self.motion.lock();
            let count = motion.snap_positions.len();
            if count == 0 {
                return;
            }
            let step = self.config.items_per_second * dt.as_secs_f64() / count as f64;
            motion.progress = (motion.progress + step).rem_euclid(1.0);
            ProgressSample {
                snap_positions: motion.snap_positions.clone(),
                progress: motion.progress,
            }
        };
        self.samples.send_replace(sample);
    }
}

async fn run_ticker(reel: Weak<SimulatedReel>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(reel) = reel.upgrade() else {
            break;
        };
        reel.advance(tick);
    }
}

impl ReelSurface for SimulatedReel {
    fn load(&self, items: &[Bag]) {
        let count = items.len();
        let mut motion = self.motion.lock();
        motion.snap_positions = (0..count)
            .map(|i| i as f64 / count as f64)
            .collect::<Vec<_>>()
            .into();
        motion.progress = 0.0;
    }

    fn start_motion(&self) {
        self.moving.store(true, Ordering::Release);
    }

    fn halt_motion(&self) {
        self.moving.store(false, Ordering::Release);
    }

    fn scroll_to(&self, index: usize) {
        let sample = {
            let mut motion = self.motion.lock();
            let Some(&snap) = motion.snap_positions.get(index) else {
                log::warn!("[SimReel] Scroll target {} out of range", index);
                return;
            };
            motion.progress = snap;
            ProgressSample {
                snap_positions: motion.snap_positions.clone(),
                progress: snap,
            }
        };
        self.samples.send_replace(sample);
    }

    fn is_moving(&self) -> bool {
        self.moving.load(Ordering::Acquire)
    }
}
