//! Slot machine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reel stop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelConfig {
    /// Tolerance band for loops with fewer than `dense_item_count` items
    pub sparse_tolerance: f64,
    /// Tolerance band for dense loops (item spacing is smaller)
    pub dense_tolerance: f64,
    /// Item count at which a loop counts as dense
    pub dense_item_count: usize,
    /// Aim used in place of a zero snap position
    pub zero_aim: f64,
    /// Force the stop once this much time has passed since the request (ms)
    pub fallback_after_ms: u64,
}

impl ReelConfig {
    /// Tolerance band for a loop of `item_count` items
    pub fn tolerance_for(&self, item_count: usize) -> f64 {
        if item_count < self.dense_item_count {
            self.sparse_tolerance
        } else {
            self.dense_tolerance
        }
    }

    pub fn fallback_after(&self) -> Duration {
        Duration::from_millis(self.fallback_after_ms)
    }
}

impl Default for ReelConfig {
    fn default() -> Self {
        Self {
            sparse_tolerance: 0.15,
            dense_tolerance: 0.10,
            dense_item_count: 10,
            zero_aim: 0.1,
            fallback_after_ms: 3000,
        }
    }
}

/// Play sequencing delays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// All reels visibly moving before the first stop (ms)
    pub warmup_ms: u64,
    /// Pause after each reel settles (ms)
    pub inter_reel_ms: u64,
    /// Kiosk mode: delay between a win and story playback (ms)
    pub play_after_win_ms: u64,
}

impl TimingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn inter_reel(&self) -> Duration {
        Duration::from_millis(self.inter_reel_ms)
    }

    pub fn play_after_win(&self) -> Duration {
        Duration::from_millis(self.play_after_win_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 1000,
            inter_reel_ms: 600,
            play_after_win_ms: 4000,
        }
    }
}

/// Complete slot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub reel: ReelConfig,
    pub timing: TimingConfig,
    /// Unattended kiosk: a win schedules story playback automatically
    pub kiosk: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_bands() {
        let config = ReelConfig::default();
        assert_eq!(config.tolerance_for(1), 0.15);
        assert_eq!(config.tolerance_for(9), 0.15);
        assert_eq!(config.tolerance_for(10), 0.10);
        assert_eq!(config.tolerance_for(15), 0.10);
    }

    #[test]
    fn test_default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.warmup(), Duration::from_millis(1000));
        assert_eq!(timing.inter_reel(), Duration::from_millis(600));
        assert_eq!(timing.play_after_win(), Duration::from_millis(4000));
    }

    #[test]
    fn test_partial_json() {
        let config: SlotConfig =
            serde_json::from_str(r#"{"kiosk": true, "timing": {"inter_reel_ms": 250}}"#).unwrap();
        assert!(config.kiosk);
        assert_eq!(config.timing.inter_reel_ms, 250);
        assert_eq!(config.timing.warmup_ms, 1000);
        assert_eq!(config.reel.fallback_after_ms, 3000);
    }
}
