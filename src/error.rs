//! Error types for symcount.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::shutdown::CANCELLED_EXIT_CODE;

/// Exit status used when no OS error code is available.
pub const EXIT_FAILURE: i32 = 1;

/// Main error type for symcount.
#[derive(Error, Debug)]
pub enum SymCountError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("Failed to allocate worker pool: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    #[error("Malformed result message: {0}")]
    Protocol(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Failed to install termination handler: {0}")]
    SignalSetup(#[from] ctrlc::Error),

    #[error("Report output was closed by its consumer")]
    OutputClosed,

    #[error("Interrupted by termination request")]
    Cancelled,
}

impl SymCountError {
    /// Wrap an OS-level failure with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Process exit status for this error.
    ///
    /// Resource failures carry the underlying errno so callers can tell
    /// ENOENT from EACCES without parsing stderr.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { source, .. } => match source.raw_os_error() {
                Some(code) if code > 0 => code,
                _ => EXIT_FAILURE,
            },
            Self::Allocation(_) => nix::errno::Errno::ENOMEM as i32,
            Self::Cancelled => CANCELLED_EXIT_CODE,
            Self::InvalidInput(_)
            | Self::NotRegularFile(_)
            | Self::Protocol(_)
            | Self::Worker(_)
            | Self::SignalSetup(_)
            | Self::OutputClosed => EXIT_FAILURE,
        }
    }

    /// Whether this error means the consumer of our output went away.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::OutputClosed => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::BrokenPipe,
            _ => false,
        }
    }
}

/// Result type alias for symcount operations.
pub type Result<T> = std::result::Result<T, SymCountError>;
