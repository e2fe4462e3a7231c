//! Scripted serial backend for tests

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serialport::ErrorKind;

use crate::backend::{RawPort, SerialBackend, SerialHandle};

/// What the next `open` call should do
#[derive(Debug, Clone)]
pub enum OpenScript {
    Succeed,
    Busy,
    Missing,
}

#[derive(Default)]
struct Shared {
    ports: Mutex<Vec<RawPort>>,
    script: Mutex<VecDeque<OpenScript>>,
    opened_paths: Mutex<Vec<String>>,
    written: Mutex<Vec<u8>>,
    open_calls: AtomicUsize,
    live_handles: AtomicUsize,
    fail_writes: Mutex<bool>,
    fail_close: Mutex<bool>,
    open_delay: Mutex<Option<Duration>>,
}

/// In-memory backend; clones share state
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn with_ports(ports: Vec<RawPort>) -> Self {
        let backend = Self::default();
        *backend.shared.ports.lock() = ports;
        backend
    }

    /// Queue open outcomes; an empty script means success
    pub fn script(&self, steps: impl IntoIterator<Item = OpenScript>) {
        self.shared.script.lock().extend(steps);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.shared.open_delay.lock() = Some(delay);
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.shared.fail_writes.lock() = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        *self.shared.fail_close.lock() = fail;
    }

    pub fn open_calls(&self) -> usize {
        self.shared.open_calls.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    pub fn opened_paths(&self) -> Vec<String> {
        self.shared.opened_paths.lock().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.shared.written.lock().clone()
    }
}

impl SerialBackend for MockBackend {
    fn available_ports(&self) -> Result<Vec<RawPort>, serialport::Error> {
        Ok(self.shared.ports.lock().clone())
    }

    fn open(&self, path: &str, _baud_rate: u32) -> Result<Box<dyn SerialHandle>, serialport::Error> {
        self.shared.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.shared.open_delay.lock() {
            std::thread::sleep(delay);
        }

        let step = self.shared.script.lock().pop_front().unwrap_or(OpenScript::Succeed);
        match step {
            OpenScript::Succeed => {
                self.shared.live_handles.fetch_add(1, Ordering::SeqCst);
                self.shared.opened_paths.lock().push(path.to_string());
                Ok(Box::new(MockHandle {
                    shared: Arc::clone(&self.shared),
                }))
            }
            OpenScript::Busy => Err(serialport::Error::new(
                ErrorKind::Io(io::ErrorKind::ResourceBusy),
                "Resource temporarily unavailable",
            )),
            OpenScript::Missing => Err(serialport::Error::new(
                ErrorKind::NoDevice,
                "No such file or directory",
            )),
        }
    }
}

struct MockHandle {
    shared: Arc<Shared>,
}

impl SerialHandle for MockHandle {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if *self.shared.fail_writes.lock() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.shared.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        if *self.shared.fail_close.lock() {
            return Err(io::Error::other("close interrupted"));
        }
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
