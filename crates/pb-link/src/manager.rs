//! Link Manager: owns the one serial handle to the cabinet
//!
//! At most one handle is open and at most one open attempt is in flight.
//! Blocking device calls run on tokio's blocking pool; the handle itself sits
//! behind a mutex so a close can never race a write. A close bumps the link
//! generation, so an open still in flight when it lands discards its handle
//! instead of installing it. After `shutdown` no open is accepted.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::{NativeBackend, SerialBackend, SerialHandle, is_transient};
use crate::config::LinkConfig;
use crate::device::DeviceDescriptor;
use crate::error::{LinkError, LinkResult};

/// Asynchronous line events for the open handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    Opened { path: String, baud_rate: u32, attempt: u32 },
    Error { path: String, message: String },
    Closed { path: String },
}

type SharedHandle = Arc<Mutex<Option<Box<dyn SerialHandle>>>>;

struct OpenPort {
    path: String,
    baud_rate: u32,
    handle: SharedHandle,
}

impl OpenPort {
    fn close_blocking(&self) -> io::Result<()> {
        match self.handle.lock().take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }
}

/// Resets the in-flight flag however `open` exits
struct OpeningGuard<'a>(&'a AtomicBool);

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serial link manager
pub struct LinkManager {
    backend: Arc<dyn SerialBackend>,
    config: LinkConfig,
    port: Mutex<Option<OpenPort>>,
    opening: AtomicBool,
    /// Bumped by every close
    generation: AtomicU64,
    shut_down: AtomicBool,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkManager {
    /// Create a manager over a backend
    pub fn new(backend: impl SerialBackend, config: LinkConfig) -> Self {
        Self::with_backend(Arc::new(backend), config)
    }

    /// Create a manager over a shared backend
    pub fn with_backend(backend: Arc<dyn SerialBackend>, config: LinkConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            backend,
            config,
            port: Mutex::new(None),
            opening: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            events,
        }
    }

    /// Manager over the OS serial ports
    pub fn native(config: LinkConfig) -> Self {
        Self::new(NativeBackend::new(), config)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Subscribe to line events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Whether a handle is currently open
    pub fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    /// Path of the open handle, if any
    pub fn open_path(&self) -> Option<String> {
        self.port.lock().as_ref().map(|p| p.path.clone())
    }

    /// Baud rate of the open handle, if any
    pub fn open_baud_rate(&self) -> Option<u32> {
        self.port.lock().as_ref().map(|p| p.baud_rate)
    }

    /// Whether an open attempt is in flight
    pub fn is_opening(&self) -> bool {
        self.opening.load(Ordering::Acquire)
    }

    /// Whether `shutdown` has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Enumerate attached devices; enumeration failures yield an empty list
    pub async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let backend = Arc::clone(&self.backend);
        let ports = match tokio::task::spawn_blocking(move || backend.available_ports()).await {
            Ok(Ok(ports)) => ports,
            Ok(Err(e)) => {
                log::warn!("[Link] Port enumeration failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                log::warn!("[Link] Port enumeration task failed: {}", e);
                Vec::new()
            }
        };

        ports
            .into_iter()
            .map(|raw| DeviceDescriptor::classify(raw, &self.config))
            .collect()
    }

    /// Open `path` at `baud_rate`, retrying on transient contention
    ///
    /// Returns the current open state without doing anything when another
    /// open is already in flight, and `true` when `path` is already open.
    /// Returns `false` when a `close` lands while this open is in flight.
    pub async fn open(&self, path: &str, baud_rate: u32) -> LinkResult<bool> {
        if self.is_shut_down() {
            return Err(LinkError::ShutDown);
        }
        if self.opening.swap(true, Ordering::AcqRel) {
            log::info!("[Link] Open already in progress; ignoring");
            return Ok(self.is_open());
        }
        let _guard = OpeningGuard(&self.opening);

        let previous = {
            let mut slot = self.port.lock();
            if slot.as_ref().is_some_and(|p| p.path == path) {
                log::debug!("[Link] {} already open", path);
                return Ok(true);
            }
            slot.take()
        };
        if let Some(previous) = previous {
            self.release(previous).await;
        }
        let generation = self.generation.load(Ordering::Acquire);

        let max_attempts = self.config.open_attempts.max(1);
        let mut attempt = 1;
        loop {
            if self.generation.load(Ordering::Acquire) != generation {
                log::info!("[Link] Open of {} cancelled by close", path);
                return self.cancelled_open();
            }
            let backend = Arc::clone(&self.backend);
            let target = path.to_owned();
            let result = tokio::task::spawn_blocking(move || backend.open(&target, baud_rate)).await?;

            match result {
                Ok(handle) => {
                    let stale = {
                        let mut slot = self.port.lock();
                        if self.generation.load(Ordering::Acquire) == generation {
                            *slot = Some(OpenPort {
                                path: path.to_owned(),
                                baud_rate,
                                handle: Arc::new(Mutex::new(Some(handle))),
                            });
                            None
                        } else {
                            Some(handle)
                        }
                    };
                    if let Some(handle) = stale {
                        log::info!("[Link] Closed while opening {}; discarding handle", path);
                        self.discard(path, handle).await;
                        return self.cancelled_open();
                    }
                    log::info!("[Link] Open {} @ {} baud (attempt {})", path, baud_rate, attempt);
                    self.watch_port(path.to_owned());
                    let _ = self.events.send(LinkEvent::Opened {
                        path: path.to_owned(),
                        baud_rate,
                        attempt,
                    });
                    return Ok(true);
                }
                Err(err) => {
                    let transient = is_transient(&err);
                    log::warn!(
                        "[Link] Open failed (attempt {}/{}): {}",
                        attempt,
                        max_attempts,
                        err
                    );
                    if transient && attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    log::error!("[Link] Giving up opening {}: {}", path, err);
                    return Err(LinkError::open_failed(path, attempt, err));
                }
            }
        }
    }

    /// Write and drain; `false` when nothing is open
    pub async fn write(&self, bytes: &[u8]) -> LinkResult<bool> {
        let current = self
            .port
            .lock()
            .as_ref()
            .map(|p| (p.path.clone(), Arc::clone(&p.handle)));
        let Some((path, handle)) = current else {
            log::debug!("[Link] Write skipped; no device open");
            return Ok(false);
        };

        let payload = bytes.to_vec();
        let result = tokio::task::spawn_blocking(move || -> io::Result<bool> {
            let mut guard = handle.lock();
            let Some(port) = guard.as_mut() else {
                return Ok(false);
            };
            port.write_all(&payload)?;
            port.drain()?;
            Ok(true)
        })
        .await?;

        result.map_err(|source| {
            let _ = self.events.send(LinkEvent::Error {
                path: path.clone(),
                message: source.to_string(),
            });
            LinkError::WriteFailed { path, source }
        })
    }

    /// Close the open handle; physical close failures are swallowed
    ///
    /// An open still in flight is cancelled and never installs its handle.
    pub async fn close(&self) -> bool {
        let current = {
            let mut slot = self.port.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            slot.take()
        };
        if let Some(port) = current {
            self.release(port).await;
        }
        true
    }

    /// Force-close on process shutdown; later opens fail with `ShutDown`
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        if self.is_open() {
            log::info!("[Link] Closing link on shutdown");
        }
        self.close().await;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    async fn release(&self, port: OpenPort) {
        let path = port.path.clone();
        match tokio::task::spawn_blocking(move || port.close_blocking()).await {
            Ok(Ok(())) => log::info!("[Link] Closed {}", path),
            Ok(Err(e)) => log::warn!("[Link] Error closing {}: {}", path, e),
            Err(e) => log::warn!("[Link] Close task for {} failed: {}", path, e),
        }
        let _ = self.events.send(LinkEvent::Closed { path });
    }

    fn cancelled_open(&self) -> LinkResult<bool> {
        if self.is_shut_down() {
            Err(LinkError::ShutDown)
        } else {
            Ok(false)
        }
    }

    /// Close a handle that was never installed
    async fn discard(&self, path: &str, handle: Box<dyn SerialHandle>) {
        match tokio::task::spawn_blocking(move || handle.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[Link] Error closing discarded {}: {}", path, e),
            Err(e) => log::warn!("[Link] Close task for {} failed: {}", path, e),
        }
    }

    /// Log line errors and closure for `path` until it closes
    fn watch_port(&self, path: String) {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LinkEvent::Error { path: p, message }) if p == path => {
                        log::error!("[Link] {} error: {}", p, message);
                    }
                    Ok(LinkEvent::Closed { path: p }) if p == path => {
                        log::info!("[Link] {} closed", p);
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("[Link] Event watcher lagged by {}", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        if let Some(port) = self.port.get_mut().take() {
            let _ = port.close_blocking();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawPort;
    use crate::testing::{MockBackend, OpenScript};
    use std::time::Duration;

    fn manager(backend: &MockBackend) -> LinkManager {
        LinkManager::new(backend.clone(), LinkConfig::default())
    }

    #[tokio::test]
    async fn test_write_without_device_returns_false() {
        let backend = MockBackend::default();
        let link = manager(&backend);
        assert!(!link.write(b"i").await.unwrap());
        assert!(backend.written().is_empty());
    }

    #[tokio::test]
    async fn test_open_and_write() {
        let backend = MockBackend::default();
        let link = manager(&backend);

        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert!(link.is_open());
        assert_eq!(link.open_path().as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(link.open_baud_rate(), Some(115_200));

        assert!(link.write(b"w").await.unwrap());
        assert_eq!(backend.written(), b"w".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_succeeds_on_sixth_attempt() {
        let backend = MockBackend::default();
        backend.script(std::iter::repeat_n(OpenScript::Busy, 5));
        let link = manager(&backend);

        let start = tokio::time::Instant::now();
        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());

        assert_eq!(backend.open_calls(), 6);
        assert!(start.elapsed() >= Duration::from_millis(300 + 600 + 900 + 1200 + 1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_gives_up_after_six_transient_failures() {
        let backend = MockBackend::default();
        backend.script(std::iter::repeat_n(OpenScript::Busy, 6));
        let link = manager(&backend);

        let err = link.open("/dev/ttyACM0", 115_200).await.unwrap_err();
        match err {
            LinkError::OpenFailed { attempts, ref path, .. } => {
                assert_eq!(attempts, 6);
                assert_eq!(path, "/dev/ttyACM0");
            }
            other => panic!("Expected OpenFailed, got {:?}", other),
        }
        assert_eq!(backend.open_calls(), 6);
        assert!(!link.is_open());
        assert!(!link.is_opening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_aborts_immediately() {
        let backend = MockBackend::default();
        backend.script([OpenScript::Missing]);
        let link = manager(&backend);

        let start = tokio::time::Instant::now();
        let err = link.open("/dev/ttyACM9", 115_200).await.unwrap_err();

        assert!(matches!(err, LinkError::OpenFailed { attempts: 1, .. }));
        assert_eq!(backend.open_calls(), 1);
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_reopen_same_path_is_noop() {
        let backend = MockBackend::default();
        let link = manager(&backend);

        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(backend.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_open_other_path_closes_previous() {
        let backend = MockBackend::default();
        let link = manager(&backend);
        let mut events = link.subscribe();

        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert!(link.open("/dev/ttyACM1", 115_200).await.unwrap());

        assert_eq!(backend.live_handles(), 1);
        assert_eq!(link.open_path().as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(backend.opened_paths(), vec!["/dev/ttyACM0", "/dev/ttyACM1"]);

        let mut closed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::Closed { path } = event {
                closed.push(path);
            }
        }
        assert_eq!(closed, vec!["/dev/ttyACM0".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_open_single_handle() {
        let backend = MockBackend::default();
        backend.set_open_delay(Duration::from_millis(50));
        let link = manager(&backend);

        let (first, second) = tokio::join!(
            link.open("/dev/ttyACM0", 115_200),
            link.open("/dev/ttyACM0", 115_200)
        );

        assert!(first.unwrap());
        // Second caller observed the in-flight attempt, not a second handle
        assert!(!second.unwrap());
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(backend.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_handle() {
        let backend = MockBackend::default();
        let link = manager(&backend);
        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());

        backend.fail_writes(true);
        let err = link.write(b"o").await.unwrap_err();
        assert!(matches!(err, LinkError::WriteFailed { .. }));
        assert!(link.is_open());

        backend.fail_writes(false);
        assert!(link.write(b"o").await.unwrap());
    }

    #[tokio::test]
    async fn test_close() {
        let backend = MockBackend::default();
        let link = manager(&backend);

        assert!(link.close().await);

        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert!(link.close().await);
        assert!(!link.is_open());
        assert_eq!(backend.live_handles(), 0);
        assert!(!link.write(b"i").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_during_open_discards_handle() {
        let backend = MockBackend::default();
        backend.set_open_delay(Duration::from_millis(50));
        let link = manager(&backend);

        let (opened, closed) = tokio::join!(link.open("/dev/ttyACM0", 115_200), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            link.close().await
        });

        assert!(closed);
        assert!(!opened.unwrap());
        assert!(!link.is_open());
        assert!(!link.is_opening());
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(backend.live_handles(), 0);

        // A fresh open after the close works normally
        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        assert_eq!(backend.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_later_opens() {
        let backend = MockBackend::default();
        let link = manager(&backend);
        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());

        link.shutdown().await;
        assert!(link.is_shut_down());
        assert!(!link.is_open());

        let err = link.open("/dev/ttyACM0", 115_200).await.unwrap_err();
        assert!(matches!(err, LinkError::ShutDown));
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(backend.live_handles(), 0);
        assert!(!link.write(b"i").await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_during_open_discards_handle() {
        let backend = MockBackend::default();
        backend.set_open_delay(Duration::from_millis(50));
        let link = manager(&backend);

        let (opened, ()) = tokio::join!(link.open("/dev/ttyACM0", 115_200), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            link.shutdown().await
        });

        assert!(matches!(opened, Err(LinkError::ShutDown)));
        assert!(!link.is_open());
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_close_failure_is_swallowed() {
        let backend = MockBackend::default();
        let link = manager(&backend);
        let mut events = link.subscribe();

        assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
        backend.fail_close(true);

        // Reopening elsewhere still succeeds when the old handle fails to close
        assert!(link.open("/dev/ttyACM1", 115_200).await.unwrap());
        assert_eq!(link.open_path().as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(backend.live_handles(), 1);

        assert!(link.close().await);
        assert!(!link.is_open());
        assert_eq!(link.open_path(), None);
        assert_eq!(backend.live_handles(), 0);
        assert!(!link.write(b"o").await.unwrap());

        let mut closed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::Closed { path } = event {
                closed.push(path);
            }
        }
        assert_eq!(closed, vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_releases_handle() {
        let backend = MockBackend::default();
        {
            let link = manager(&backend);
            assert!(link.open("/dev/ttyACM0", 115_200).await.unwrap());
            assert_eq!(backend.live_handles(), 1);
        }
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_list_devices_classifies() {
        let backend = MockBackend::with_ports(vec![
            RawPort::usb("/dev/ttyUSB0", 0x0403, 0x6001, Some("FTDI")),
            RawPort::usb("/dev/ttyACM0", 0x2341, 0x0043, Some("Arduino LLC")),
        ]);
        let link = manager(&backend);

        let devices = link.list_devices().await;
        assert_eq!(devices.len(), 2);
        assert!(!devices[0].is_recognized_controller);
        assert!(devices[1].is_recognized_controller);
    }

    #[tokio::test]
    async fn test_list_devices_empty() {
        let link = manager(&MockBackend::default());
        assert!(link.list_devices().await.is_empty());
    }
}
