//! Serial backend abstraction
//!
//! The link manager never talks to `serialport` directly. Everything goes
//! through [`SerialBackend`], so the retry and exclusivity logic can be
//! exercised against scripted devices.

use std::io::{self, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};

/// Raw port entry as reported by the OS enumerator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPort {
    pub path: String,
    pub manufacturer: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl RawPort {
    /// USB port with vendor/product ids
    pub fn usb(path: &str, vendor_id: u16, product_id: u16, manufacturer: Option<&str>) -> Self {
        Self {
            path: path.to_string(),
            manufacturer: manufacturer.map(str::to_string),
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }
}

impl From<serialport::SerialPortInfo> for RawPort {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                path: info.port_name,
                manufacturer: usb.manufacturer,
                vendor_id: Some(usb.vid),
                product_id: Some(usb.pid),
            },
            _ => Self {
                path: info.port_name,
                ..Self::default()
            },
        }
    }
}

/// An open, exclusively owned device handle
pub trait SerialHandle: Send {
    /// Write the whole payload
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until the transmit buffer has drained
    fn drain(&mut self) -> io::Result<()>;

    /// Release the device
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Port enumeration and opening
///
/// Implementations are called from tokio's blocking pool.
pub trait SerialBackend: Send + Sync + 'static {
    /// Enumerate currently attached ports
    fn available_ports(&self) -> Result<Vec<RawPort>, serialport::Error>;

    /// Open `path` at `baud_rate` (8/N/1, no OS-level lock)
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialHandle>, serialport::Error>;
}

// ═══════════════════════════════════════════════════════════════════════════
// NATIVE BACKEND
// ═══════════════════════════════════════════════════════════════════════════

/// Backend over the `serialport` crate
#[derive(Debug, Clone)]
pub struct NativeBackend {
    io_timeout: Duration,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self {
            io_timeout: Duration::from_millis(1000),
        }
    }

    /// Set the per-call read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialBackend for NativeBackend {
    fn available_ports(&self) -> Result<Vec<RawPort>, serialport::Error> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(RawPort::from)
            .collect())
    }

    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialHandle>, serialport::Error> {
        let builder = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.io_timeout);

        // TIOCEXCL is left off: a crashed kiosk must not leave the tty locked
        #[cfg(unix)]
        let port: Box<dyn serialport::SerialPort> = {
            let mut tty = builder.open_native()?;
            tty.set_exclusive(false)?;
            Box::new(tty)
        };
        #[cfg(not(unix))]
        let port = builder.open()?;

        Ok(Box::new(NativePort { inner: port }))
    }
}

struct NativePort {
    inner: Box<dyn serialport::SerialPort>,
}

impl SerialHandle for NativePort {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn drain(&mut self) -> io::Result<()> {
        // tcdrain on unix, FlushFileBuffers on windows
        self.inner.flush()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════

/// Message fragments that identify OS-level contention
const TRANSIENT_SIGNATURES: [&str; 6] = [
    "temporarily unavailable",
    "ebusy",
    "eagain",
    "resource busy",
    "access denied",
    "access is denied",
];

/// Whether an open failure is worth retrying
pub fn is_transient(err: &serialport::Error) -> bool {
    if let serialport::ErrorKind::Io(kind) = err.kind() {
        if matches!(
            kind,
            io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy | io::ErrorKind::PermissionDenied
        ) {
            return true;
        }
    }

    let text = err.to_string().to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| text.contains(sig))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::ErrorKind;

    #[test]
    fn test_busy_kinds_are_transient() {
        let busy = serialport::Error::new(ErrorKind::Io(io::ErrorKind::ResourceBusy), "busy");
        let denied = serialport::Error::new(ErrorKind::Io(io::ErrorKind::PermissionDenied), "nope");
        assert!(is_transient(&busy));
        assert!(is_transient(&denied));
    }

    #[test]
    fn test_transient_by_message() {
        let err = serialport::Error::new(
            ErrorKind::Unknown,
            "Error: Resource temporarily unavailable, cannot open /dev/ttyACM0",
        );
        assert!(is_transient(&err));

        let err = serialport::Error::new(ErrorKind::Unknown, "EBUSY");
        assert!(is_transient(&err));
    }

    #[test]
    fn test_missing_device_is_not_transient() {
        let err = serialport::Error::new(ErrorKind::NoDevice, "No such file or directory");
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_raw_port_from_usb_info() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".into(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: None,
                manufacturer: Some("Arduino LLC".into()),
                product: None,
            }),
        };
        let raw = RawPort::from(info);
        assert_eq!(raw.vendor_id, Some(0x2341));
        assert_eq!(raw.manufacturer.as_deref(), Some("Arduino LLC"));
    }

    #[test]
    fn test_raw_port_without_usb_ids() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        };
        let raw = RawPort::from(info);
        assert_eq!(raw.path, "/dev/ttyS0");
        assert_eq!(raw.vendor_id, None);
    }
}
