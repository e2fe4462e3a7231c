//! Link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Baud rate the cabinet firmware listens on
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Vendor ids of the controller boards shipped in cabinets
/// (Arduino LLC, Arduino SRL, SparkFun, Adafruit)
pub const RECOGNIZED_VENDOR_IDS: [&str; 4] = ["2341", "2a03", "1b4f", "239a"];

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Baud rate used by the signal adapter
    pub baud_rate: u32,
    /// Maximum open attempts on transient contention
    pub open_attempts: u32,
    /// Linear backoff base (attempt × base)
    pub backoff_base_ms: u64,
    /// Vendor ids (4 hex digits) treated as recognized controllers
    pub recognized_vendor_ids: Vec<String>,
}

impl LinkConfig {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(attempt as u64))
    }

    /// Case-insensitive vendor id match against the allow-set
    pub fn is_recognized(&self, vendor_id: &str) -> bool {
        !vendor_id.is_empty()
            && self
                .recognized_vendor_ids
                .iter()
                .any(|known| known.eq_ignore_ascii_case(vendor_id))
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_attempts: 6,
            backoff_base_ms: 300,
            recognized_vendor_ids: RECOGNIZED_VENDOR_IDS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let config = LinkConfig::default();
        let delays: Vec<u64> = (1..=5)
            .map(|a| config.backoff_for(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![300, 600, 900, 1200, 1500]);
    }

    #[test]
    fn test_vendor_match_ignores_case() {
        let config = LinkConfig::default();
        assert!(config.is_recognized("2A03"));
        assert!(config.is_recognized("239a"));
        assert!(!config.is_recognized("0403"));
        assert!(!config.is_recognized(""));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: LinkConfig = serde_json::from_str(r#"{"open_attempts": 2}"#).unwrap();
        assert_eq!(config.open_attempts, 2);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.recognized_vendor_ids.len(), 4);
    }
}
