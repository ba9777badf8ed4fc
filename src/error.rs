//! Error Types
//!
//! Every [`LinkError`] is fatal to a run: the coordinator stops at the first
//! one, and the binary prints final statistics and exits non-zero.

use thiserror::Error;

use crate::worker::Role;

/// Fatal condition raised by a round
#[derive(Error, Debug)]
pub enum LinkError {
    // === Transport ===
    #[error("{role} I/O error: {source}")]
    Io {
        role: Role,
        #[source]
        source: std::io::Error,
    },

    #[error("Short write {written} < {expected}: endpoint closed")]
    WriteClosed { written: usize, expected: usize },

    #[error("Short read {received} < {expected}: endpoint closed")]
    ReadClosed { received: usize, expected: usize },

    #[error("{role} worker terminated without reporting")]
    WorkerLost { role: Role },

    // === Integrity ===
    #[error("Data mismatch: {mismatches} of {len} bytes differ")]
    Mismatch { mismatches: usize, len: usize },
}

impl LinkError {
    /// Short machine-friendly code for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::Io { .. } => "IO",
            LinkError::WriteClosed { .. } => "WRITE_CLOSED",
            LinkError::ReadClosed { .. } => "READ_CLOSED",
            LinkError::WorkerLost { .. } => "WORKER_LOST",
            LinkError::Mismatch { .. } => "DATA_MISMATCH",
        }
    }

    /// True for data integrity failures, false for transport failures
    pub fn is_integrity(&self) -> bool {
        matches!(self, LinkError::Mismatch { .. })
    }
}

/// Configuration load/validation failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Maximum message length must be in 1..={max}, got {got}")]
    InvalidLength { got: u32, max: usize },

    #[error("Invalid log filter {0:?}")]
    LogFilter(String),

    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Device open/termios failure
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open {path} for {access}: {source}")]
    Open {
        path: String,
        access: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed on {path}: {source}")]
    Termios {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown serial speed {0}")]
    UnknownSpeed(u32),

    #[error("Device open thread panicked for {0}")]
    OpenPanicked(String),
}
