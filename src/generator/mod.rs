//! Deterministic Test Data Generation
//!
//! # Components
//!
//! - [`mt19937`] - Mersenne Twister PRNG, the single randomness source of a run
//! - [`message`] - Per-round test message builder

pub mod message;
pub mod mt19937;

pub use message::{MAX_MESSAGE_LEN, Message, MessageLength};
pub use mt19937::Mt19937;
