//! Device discovery types

use serde::{Deserialize, Serialize};

use crate::backend::RawPort;
use crate::config::LinkConfig;

/// An attached serial device, enumerated fresh on every discovery call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// OS path (`/dev/ttyACM0`, `COM3`, ...)
    pub path: String,
    pub manufacturer: String,
    /// Lowercase 4-digit hex, empty when not a USB device
    pub vendor_id: String,
    /// Lowercase 4-digit hex, empty when not a USB device
    pub product_id: String,
    /// Vendor id is in the recognized allow-set
    pub is_recognized_controller: bool,
    /// Human-readable label for logs
    pub friendly: String,
}

impl DeviceDescriptor {
    /// Classify a raw port against the configured allow-set
    pub fn classify(raw: RawPort, config: &LinkConfig) -> Self {
        let vendor_id = raw.vendor_id.map(|v| format!("{:04x}", v)).unwrap_or_default();
        let product_id = raw.product_id.map(|p| format!("{:04x}", p)).unwrap_or_default();
        let manufacturer = raw.manufacturer.unwrap_or_default();
        let friendly = format!(
            "{} {}",
            if manufacturer.is_empty() { "Unknown" } else { manufacturer.as_str() },
            raw.path
        );

        Self {
            is_recognized_controller: config.is_recognized(&vendor_id),
            path: raw.path,
            manufacturer,
            vendor_id,
            product_id,
            friendly,
        }
    }
}

/// Pick the device to signal: first recognized controller, else first device
pub fn select_device(devices: &[DeviceDescriptor]) -> Option<&DeviceDescriptor> {
    devices
        .iter()
        .find(|d| d.is_recognized_controller)
        .or_else(|| devices.first())
}
