//! Run Statistics
//!
//! Process-wide counters shared by the coordinator, both workers and the
//! interrupt watcher. Workers update once per round on success.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkStats {
    /// Completed rounds
    pub messages: AtomicU64,
    /// Bytes written by the transmit worker
    pub tx_bytes: AtomicU64,
    /// Verified prefix bytes read by the receive worker
    pub rx_bytes: AtomicU64,
    /// Unverified tail bytes drained between rounds
    pub discarded_bytes: AtomicU64,
    /// Set once the final report has been handed out
    finished: AtomicBool,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_messages(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tx_bytes(&self, n: usize) {
        self.tx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_rx_bytes(&self, n: usize) {
        self.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_discarded_bytes(&self, n: usize) {
        self.discarded_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
        }
    }

    /// Final snapshot, handed out to the first caller only.
    ///
    /// The normal exit path and the interrupt path both call this; whoever
    /// wins prints the summary.
    pub fn finish(&self) -> Option<StatsSnapshot> {
        if self.finished.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(self.snapshot())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub discarded_bytes: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages={} tx_bytes={} rx_bytes={}",
            self.messages, self.tx_bytes, self.rx_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let stats = LinkStats::new();
        stats.incr_messages();
        stats.add_tx_bytes(10);
        stats.add_rx_bytes(4);
        stats.add_discarded_bytes(6);

        let snap = stats.snapshot();
        assert_eq!(snap.messages, 1);
        assert_eq!(snap.tx_bytes, 10);
        assert_eq!(snap.rx_bytes, 4);
        assert_eq!(snap.discarded_bytes, 6);
    }

    #[test]
    fn test_summary_format() {
        let snap = StatsSnapshot {
            messages: 1,
            tx_bytes: 8,
            rx_bytes: 3,
            discarded_bytes: 5,
        };
        assert_eq!(snap.to_string(), "messages=1 tx_bytes=8 rx_bytes=3");
    }

    #[test]
    fn test_finish_once() {
        let stats = LinkStats::new();
        stats.add_tx_bytes(1);
        assert_eq!(stats.finish().map(|s| s.tx_bytes), Some(1));
        assert!(stats.finish().is_none());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(LinkStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_rx_bytes(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().rx_bytes, 4000);
    }
}
