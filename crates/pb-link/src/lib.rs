//! # pb-link: PowerBag Cabinet Link
//!
//! Owns the single serial connection to the cabinet microcontroller and maps
//! machine states onto the one-byte wire protocol it understands.
//!
//! ## Architecture
//!
//! ```text
//! SignalDispatcher (fire-and-forget queue)
//!     │
//!     v
//! ArduinoAdapter (discover → open → write)
//!     │
//!     v
//! LinkManager (one handle, retry-open, drain-on-write)
//!     │
//!     v
//! SerialBackend (serialport / mock)
//! ```
//!
//! Hardware signaling is best-effort: nothing in this crate ever blocks or
//! aborts the game flow when the device is missing or busy.

pub mod arduino;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;

pub use arduino::*;
pub use backend::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use manager::*;

#[cfg(test)]
pub(crate) mod testing;
