//! Arduino Signal Adapter: machine states to cabinet bytes
//!
//! The cabinet firmware listens for one ASCII byte per state change. The
//! adapter discovers and (re)connects on demand before every send, and never
//! reports failure as anything but `false`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::select_device;
use crate::error::{LinkError, LinkResult};
use crate::manager::LinkManager;

/// Cabinet state signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArduinoSignal {
    /// Attract mode lighting
    Idle,
    /// Lights off while reels spin
    Off,
    /// Win celebration
    Win,
}

impl ArduinoSignal {
    /// Wire byte
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => b'i',
            Self::Off => b'o',
            Self::Win => b'w',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'i' => Some(Self::Idle),
            b'o' => Some(Self::Off),
            b'w' => Some(Self::Win),
            _ => None,
        }
    }
}

/// Discovers the cabinet controller and writes state bytes to it
pub struct ArduinoAdapter {
    link: Arc<LinkManager>,
    baud_rate: u32,
    /// Path of the connection this adapter opened
    connected: Mutex<Option<String>>,
}

impl ArduinoAdapter {
    /// Adapter using the link's configured baud rate
    pub fn new(link: Arc<LinkManager>) -> Self {
        let baud_rate = link.config().baud_rate;
        Self {
            link,
            baud_rate,
            connected: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<LinkManager> {
        &self.link
    }

    /// Path of the tracked connection, if it is still open
    pub fn connected_path(&self) -> Option<String> {
        let tracked = self.connected.lock().clone()?;
        (self.link.open_path().as_deref() == Some(tracked.as_str())).then_some(tracked)
    }

    /// Make sure a device is open, discovering one if needed
    pub async fn ensure_connection(&self) -> LinkResult<String> {
        if let Some(path) = self.connected_path() {
            return Ok(path);
        }

        let devices = self.link.list_devices().await;
        let device = select_device(&devices).ok_or(LinkError::NoDeviceFound)?;

        if !self.link.open(&device.path, self.baud_rate).await? {
            return Err(LinkError::OpenInProgress);
        }

        log::info!("[Arduino] Connected via {}", device.friendly);
        *self.connected.lock() = Some(device.path.clone());
        Ok(device.path.clone())
    }

    /// Send a state byte; hardware trouble is logged and reported as `false`
    pub async fn send_event(&self, signal: ArduinoSignal) -> bool {
        match self.try_send(signal).await {
            Ok(true) => {
                log::debug!("[Arduino] Sent {:?}", signal);
                true
            }
            Ok(false) => {
                log::warn!("[Arduino] Write failed for {:?}: link closed", signal);
                false
            }
            Err(LinkError::ShutDown) => {
                log::debug!("[Arduino] Link shut down; dropping {:?}", signal);
                false
            }
            Err(LinkError::NoDeviceFound) => {
                log::warn!("[Arduino] No serial ports found; skipping {:?}", signal);
                false
            }
            Err(e) => {
                log::warn!("[Arduino] Could not send {:?}: {}", signal, e);
                false
            }
        }
    }

    async fn try_send(&self, signal: ArduinoSignal) -> LinkResult<bool> {
        self.ensure_connection().await?;
        self.link.write(&[signal.code()]).await
    }

    /// Close the link and forget the tracked connection
    pub async fn disconnect(&self) {
        self.link.close().await;
        *self.connected.lock() = None;
        log::info!("[Arduino] Disconnected");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DISPATCH
// ═══════════════════════════════════════════════════════════════════════════

/// Fire-and-forget signal queue
///
/// One worker drains the queue so sends never overlap on the link, and the
/// game flow never waits on hardware.
#[derive(Debug, Clone)]
pub struct SignalDispatcher {
    tx: mpsc::UnboundedSender<ArduinoSignal>,
}

impl SignalDispatcher {
    /// Spawn a worker that forwards queued signals to `adapter`
    pub fn spawn(adapter: Arc<ArduinoAdapter>) -> (Self, JoinHandle<()>) {
        let (dispatcher, mut rx) = Self::channel();
        let handle = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                adapter.send_event(signal).await;
            }
            log::debug!("[Arduino] Signal worker stopped");
        });
        (dispatcher, handle)
    }

    /// Detached queue; the caller owns the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ArduinoSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a signal without waiting
    pub fn dispatch(&self, signal: ArduinoSignal) {
        if self.tx.send(signal).is_err() {
            log::warn!("[Arduino] Signal worker gone; dropping {:?}", signal);
        }
    }
}
