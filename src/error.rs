//! Error types
//!
//! A single error enum covers configuration, process and transport failures.
//! Unexpected upstream exits are not errors; they are reported through
//! [`ExitReason`](crate::upstream::ExitReason).

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug)]
pub enum Error {
    /// A handler was requested without a source URL
    MissingUrl,
    /// The transcoder binary could not be started
    Spawn {
        /// Binary that failed to start
        binary: PathBuf,
        /// Underlying OS error
        source: io::Error,
    },
    /// The OS process table could not be inspected
    ProcessTable(String),
    /// Transport I/O error
    Io(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingUrl => write!(f, "URL to rtsp stream is required"),
            Error::Spawn { binary, source } => {
                write!(f, "Failed to spawn {}: {}", binary.display(), source)
            }
            Error::ProcessTable(reason) => write!(f, "Process table unavailable: {}", reason),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Spawn { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
