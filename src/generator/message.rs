//! Test Message Builder
//!
//! Messages are drawn from the shared generator in a fixed order: one draw for
//! the length (variable lengths only), then one draw per body byte.

use super::mt19937::Mt19937;

/// Hard ceiling on message length, shared with the receive buffer sizing.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// How the length of a message is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLength {
    /// Exactly this many bytes
    Fixed(u32),
    /// `next_range(1, n)` bytes
    UpTo(u32),
}

impl MessageLength {
    /// Largest message this setting can produce
    pub fn max(&self) -> u32 {
        match *self {
            MessageLength::Fixed(n) | MessageLength::UpTo(n) => n,
        }
    }
}

impl std::fmt::Display for MessageLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageLength::Fixed(n) => write!(f, "{n} bytes"),
            MessageLength::UpTo(n) => write!(f, "1..={n} bytes"),
        }
    }
}

/// One round's payload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Box<[u8]>,
}

impl Message {
    /// Build a message from the generator.
    ///
    /// # Panics
    ///
    /// Panics on a zero length; lengths are validated by the config layer.
    pub fn build(rng: &mut Mt19937, length: MessageLength) -> Self {
        let len = match length {
            MessageLength::Fixed(n) => n,
            MessageLength::UpTo(n) => rng.next_range(1, n),
        };
        assert!(len > 0, "message length must be positive");

        let body: Box<[u8]> = (0..len).map(|_| rng.next_byte()).collect();
        Self { body }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Always false for built messages; present for API symmetry with slices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// First `len` bytes of the body
    #[inline]
    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.body[..len]
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self {
            body: body.into_boxed_slice(),
        }
    }
}
