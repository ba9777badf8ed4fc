//! fifotest - Serial FIFO link-integrity tester
//!
//! Pushes deterministic pseudo-random messages through a transmit endpoint and
//! verifies a randomly truncated prefix of each on the receive endpoint, one
//! round at a time, stopping at the first corrupted byte.
//!
//! # Modules
//!
//! - [`generator`] - MT19937 byte source and message builder
//! - [`compare`] - Hex/ASCII dump and byte-level diff
//! - [`worker`] - Transmit and receive workers with short-I/O loops
//! - [`round`] - Round coordinator and its state machine
//! - [`stats`] - Process-wide counters and final summary
//! - [`loopback`] - In-memory link for tests and dry runs
//! - [`device`] - Endpoint open and termios setup
//! - [`interrupt`] - SIGINT/SIGTERM watcher

// Core
pub mod compare;
pub mod error;
pub mod generator;
pub mod round;
pub mod stats;
pub mod worker;

// Endpoints
#[cfg(unix)]
pub mod device;
pub mod loopback;

// Process plumbing
pub mod config;
pub mod interrupt;
pub mod logging;

// Convenient re-exports at crate root
pub use compare::{Diff, Highlight};
pub use config::{AppConfig, LinkConfig, LogConfig};
pub use error::{ConfigError, DeviceError, LinkError};
pub use generator::{MAX_MESSAGE_LEN, Message, MessageLength, Mt19937};
pub use round::{RoundConfig, RoundCoordinator, RoundReport, RoundState, RunSummary};
pub use stats::{LinkStats, StatsSnapshot};
pub use worker::{Role, WorkerContext};
