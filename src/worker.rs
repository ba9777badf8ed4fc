//! Transmit and Receive Workers
//!
//! One round runs one of each, on separate threads:
//!
//! ```text
//!            ┌──────────────────┐   full message   ┌──────────────────┐
//! Message ──▶│ transmit (tx)    │ ───── link ────▶ │ receive (rx)     │
//!            │ write all bytes  │                  │ draw trunc_len   │◀── Mt19937
//!            └──────────────────┘                  │ read prefix      │
//!                                                  │ diff vs message  │
//!                                                  └──────────────────┘
//! ```
//!
//! Workers never exit the process. Every fatal condition comes back as a
//! [`LinkError`] after its diagnostics have been logged.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use tracing::{Span, debug, error, info_span, trace};

use crate::compare::{self, Highlight};
use crate::error::LinkError;
use crate::generator::{Message, Mt19937};
use crate::stats::LinkStats;

/// Which side of the link a worker drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Transmit,
    Receive,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Transmit => "tx",
            Role::Receive => "rx",
        }
    }

    /// Span that tags every log line emitted by this worker
    pub fn span(&self) -> Span {
        match self {
            Role::Transmit => info_span!("tx"),
            Role::Receive => info_span!("rx"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-worker settings
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub role: Role,
    pub stats: Arc<LinkStats>,
    /// Dump every message and log every successful round
    pub verbose: bool,
    pub highlight: Highlight,
}

impl WorkerContext {
    pub fn new(role: Role, stats: Arc<LinkStats>) -> Self {
        Self {
            role,
            stats,
            verbose: false,
            highlight: Highlight::default(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> LinkError {
        LinkError::Io {
            role: self.role,
            source,
        }
    }
}

/// Write all of `buf`, looping over short writes.
pub fn write_full<W: Write + ?Sized>(
    role: Role,
    tx: &mut W,
    buf: &[u8],
) -> Result<usize, LinkError> {
    let mut written = 0;
    while written < buf.len() {
        match tx.write(&buf[written..]) {
            Ok(0) => {
                return Err(LinkError::WriteClosed {
                    written,
                    expected: buf.len(),
                });
            }
            Ok(n) => {
                written += n;
                if written < buf.len() {
                    trace!(n, written, total = buf.len(), "short write");
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(LinkError::Io { role, source }),
        }
    }
    Ok(written)
}

/// Fill all of `buf`, looping over short reads.
pub fn read_full<R: Read + ?Sized>(
    role: Role,
    rx: &mut R,
    buf: &mut [u8],
) -> Result<usize, LinkError> {
    let mut avail = 0;
    while avail < buf.len() {
        match rx.read(&mut buf[avail..]) {
            Ok(0) => {
                return Err(LinkError::ReadClosed {
                    received: avail,
                    expected: buf.len(),
                });
            }
            Ok(n) => {
                avail += n;
                if avail < buf.len() {
                    trace!(n, avail, total = buf.len(), "short read");
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(LinkError::Io { role, source }),
        }
    }
    Ok(avail)
}

/// Read and throw away exactly `len` bytes.
pub fn discard_exact<R: Read + ?Sized>(
    role: Role,
    rx: &mut R,
    len: usize,
) -> Result<usize, LinkError> {
    let mut scratch = [0u8; 256];
    let mut left = len;
    while left > 0 {
        let chunk = left.min(scratch.len());
        left -= read_full(role, rx, &mut scratch[..chunk])?;
    }
    Ok(len)
}

/// Transmit side of a round: send the whole message.
///
/// Takes no generator by construction.
pub fn transmit<W: Write + ?Sized>(
    ctx: &WorkerContext,
    message: &Message,
    tx: &mut W,
) -> Result<usize, LinkError> {
    let _span = ctx.role.span().entered();

    if ctx.verbose {
        debug!("Message with {} bytes of data", message.len());
        for line in compare::dump(message.as_bytes()) {
            debug!("{line}");
        }
    }

    let written = write_full(ctx.role, tx, message.as_bytes())?;
    tx.flush().map_err(|e| ctx.io_error(e))?;

    ctx.stats.add_tx_bytes(written);
    Ok(written)
}

/// Receive side of a round: draw the truncation length, read that many bytes
/// and verify them against the message prefix.
///
/// `armed` is called with the truncation length right after the draw, before
/// any read. It is the point after which the caller may touch the link.
pub fn receive<R, F>(
    ctx: &WorkerContext,
    message: &Message,
    rng: &mut Mt19937,
    rx: &mut R,
    armed: F,
) -> Result<usize, LinkError>
where
    R: Read + ?Sized,
    F: FnOnce(usize),
{
    let _span = ctx.role.span().entered();

    let max = u32::try_from(message.len()).unwrap_or(u32::MAX);
    let trunc_len = rng.next_range(1, max) as usize;
    debug!(
        "Receiving first {} bytes of message of size {}",
        trunc_len,
        message.len()
    );
    armed(trunc_len);

    let mut buf = vec![0u8; trunc_len];
    read_full(ctx.role, rx, &mut buf)?;

    let diff = compare::diff(&buf, message.prefix(trunc_len));
    if !diff.is_match() {
        error!(
            mismatches = diff.mismatches(),
            first_offset = ?diff.first_mismatch(),
            len = trunc_len,
            "Data mismatch"
        );
        for line in diff.lines(ctx.highlight) {
            error!("{line}");
        }
        return Err(LinkError::Mismatch {
            mismatches: diff.mismatches(),
            len: trunc_len,
        });
    }

    if ctx.verbose {
        debug!("OK");
    }
    ctx.stats.add_rx_bytes(trunc_len);
    Ok(trunc_len)
}
