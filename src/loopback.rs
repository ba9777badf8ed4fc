//! In-memory Loopback Link
//!
//! A blocking byte pipe standing in for a serial loop-back or FIFO pair.
//! Reads block until data arrives or the writer is dropped (EOF); writes fail
//! with `BrokenPipe` once the reader is gone.
//!
//! Two knobs make it useful for exercising the round protocol without devices:
//!
//! - `chunk`: upper bound on bytes moved per `read`/`write` call, so every
//!   operation can be forced short
//! - `corrupt`: flip bits of the byte at a given stream offset, as a noisy
//!   line would

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Single-byte corruption at an absolute stream offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    /// Offset counted from the first byte ever written to the pipe
    pub offset: u64,
    /// XOR mask applied to that byte; must be non-zero to have an effect
    pub xor: u8,
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Max bytes per call; 0 means unlimited
    pub chunk: usize,
    pub corrupt: Option<Corruption>,
}

impl LoopbackConfig {
    pub fn chunked(chunk: usize) -> Self {
        Self {
            chunk,
            ..Default::default()
        }
    }

    pub fn with_corruption(mut self, offset: u64, xor: u8) -> Self {
        self.corrupt = Some(Corruption { offset, xor });
        self
    }

    fn limit(&self, len: usize) -> usize {
        if self.chunk == 0 {
            len
        } else {
            len.min(self.chunk)
        }
    }
}

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    /// Total bytes ever written
    written: u64,
    writer_closed: bool,
    reader_closed: bool,
}

#[derive(Debug)]
struct Shared {
    config: LoopbackConfig,
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Shared {
    fn lock(&self) -> io::Result<MutexGuard<'_, PipeState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("loopback pipe poisoned"))
    }
}

/// Create a pipe with default settings (no chunking, no corruption).
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with(LoopbackConfig::default())
}

pub fn pipe_with(config: LoopbackConfig) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        config,
        state: Mutex::new(PipeState::default()),
        readable: Condvar::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Transmit end
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

/// Receive end
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Bytes written but not yet read
    pub fn buffered(&self) -> usize {
        self.shared.lock().map(|s| s.buf.len()).unwrap_or(0)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let config = &self.shared.config;
        let mut state = self.shared.lock()?;
        if state.reader_closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        let n = config.limit(data.len());
        for &byte in &data[..n] {
            let byte = match config.corrupt {
                Some(c) if c.offset == state.written => byte ^ c.xor,
                _ => byte,
            };
            state.buf.push_back(byte);
            state.written += 1;
        }
        drop(state);

        self.shared.readable.notify_all();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.writer_closed = true;
        }
        self.shared.readable.notify_all();
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock()?;
        while state.buf.is_empty() && !state.writer_closed {
            state = self
                .shared
                .readable
                .wait(state)
                .map_err(|_| io::Error::other("loopback pipe poisoned"))?;
        }

        let n = self.shared.config.limit(out.len()).min(state.buf.len());
        for (slot, byte) in out[..n].iter_mut().zip(state.buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.reader_closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_roundtrip() {
        let (mut tx, mut rx) = pipe();
        tx.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_chunk_limits_both_directions() {
        let (mut tx, mut rx) = pipe_with(LoopbackConfig::chunked(1));
        assert_eq!(tx.write(b"abc").unwrap(), 1);
        tx.write_all(b"bc").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(rx.read(&mut buf).unwrap(), 1);
        assert_eq!(rx.buffered(), 2);
    }

    #[test]
    fn test_corruption_at_offset() {
        let (mut tx, mut rx) = pipe_with(LoopbackConfig::default().with_corruption(2, 0x01));
        tx.write_all(&[0, 0]).unwrap();
        tx.write_all(&[0, 0]).unwrap();
        let mut buf = [0u8; 4];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 1, 0]);
    }

    #[test]
    fn test_eof_after_writer_dropped() {
        let (tx, mut rx) = pipe();
        drop(tx);
        let mut buf = [0u8; 4];
        assert_eq!(rx.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_broken_pipe_after_reader_dropped() {
        let (mut tx, rx) = pipe();
        drop(rx);
        let err = tx.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_reader_blocks_until_write() {
        let (mut tx, mut rx) = pipe();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 3];
            rx.read_exact(&mut buf).unwrap();
            buf
        });
        thread::sleep(std::time::Duration::from_millis(20));
        tx.write_all(b"xyz").unwrap();
        assert_eq!(&reader.join().unwrap(), b"xyz");
    }
}
