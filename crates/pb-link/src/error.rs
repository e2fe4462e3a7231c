//! Link error types

use thiserror::Error;

/// Serial link error
#[derive(Error, Debug)]
pub enum LinkError {
    /// All open attempts exhausted, or a non-transient failure occurred
    #[error("Failed to open {path} after {attempts} attempt(s): {source}")]
    OpenFailed {
        path: String,
        attempts: u32,
        #[source]
        source: serialport::Error,
    },

    /// Write or drain failed on an open handle
    #[error("Write to {path} failed: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Discovery returned no devices
    #[error("No serial devices found")]
    NoDeviceFound,

    /// Another open attempt is still in flight
    #[error("Open already in progress")]
    OpenInProgress,

    /// The link was shut down; no further opens are accepted
    #[error("Link is shut down")]
    ShutDown,

    /// Blocking I/O task panicked or was cancelled
    #[error("Link task failed: {0}")]
    Task(String),
}

impl LinkError {
    /// Build an `OpenFailed` error
    pub fn open_failed(path: &str, attempts: u32, source: serialport::Error) -> Self {
        Self::OpenFailed {
            path: path.to_string(),
            attempts,
            source,
        }
    }
}

impl From<tokio::task::JoinError> for LinkError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias
pub type LinkResult<T> = Result<T, LinkError>;
