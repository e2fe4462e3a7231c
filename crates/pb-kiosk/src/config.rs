//! Kiosk configuration file

use std::path::Path;

use anyhow::{Context, Result};
use pb_link::LinkConfig;
use pb_slot::{SimConfig, SlotConfig};
use serde::{Deserialize, Serialize};

/// Everything the kiosk reads at startup; every section is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub link: LinkConfig,
    pub slot: SlotConfig,
    pub simulation: SimConfig,
}

impl KioskConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: KioskConfig = serde_json::from_str(
            r#"{
                "link": {"baud_rate": 9600, "recognized_vendor_ids": ["2341"]},
                "slot": {"kiosk": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.link.baud_rate, 9600);
        assert_eq!(config.link.open_attempts, 6);
        assert!(config.link.is_recognized("2341"));
        assert!(!config.link.is_recognized("2a03"));
        assert!(config.slot.kiosk);
        assert_eq!(config.slot.timing.warmup_ms, 1000);
        assert_eq!(config.simulation.tick_ms, 16);
    }

    #[test]
    fn test_missing_file() {
        let err = KioskConfig::load(Path::new("/nonexistent/kiosk.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
