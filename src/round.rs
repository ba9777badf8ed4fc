//! Round Coordinator
//!
//! Drives the link test one round at a time:
//!
//! ```text
//!  Idle ──build──▶ MessageBuilt ──spawn rx, Armed, delay, spawn tx──▶ WorkersRunning
//!   ▲                                                                   │
//!   └──────── drain tail ◀──────── RoundComplete ◀──── both Done ───────┘
//!
//!  any state ──fatal──▶ Aborted
//! ```
//!
//! Ownership carries the single-writer rule for the generator: the coordinator
//! holds it while building the message, then moves it into the receive thread
//! together with the receive endpoint, and gets both back on join. The transmit
//! thread only ever sees the transmit endpoint and the shared message.
//!
//! The receive worker reports `Armed` right after its truncation draw. The
//! transmit worker is spawned only after that event plus `start_delay`. The
//! delay is a heuristic that lets the receiver block in `read` first; the
//! ordering of generator draws relies only on the `Armed` rendezvous.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::compare::Highlight;
use crate::error::LinkError;
use crate::generator::{Message, MessageLength, Mt19937};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::worker::{self, Role, WorkerContext};

/// Round lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundState {
    /// Waiting to start the next round
    Idle,
    /// Message drawn from the generator, workers not started
    MessageBuilt,
    /// Receive worker started (transmit worker follows after the rendezvous)
    WorkersRunning,
    /// Both workers succeeded
    RoundComplete,
    /// Terminal: a fatal error ended the run
    Aborted,
}

impl RoundState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::Aborted)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (*self, next),
            (Idle, MessageBuilt)
                | (MessageBuilt, WorkersRunning)
                | (WorkersRunning, RoundComplete)
                | (RoundComplete, Idle)
                | (Idle | MessageBuilt | WorkersRunning | RoundComplete, Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Idle => "IDLE",
            RoundState::MessageBuilt => "MESSAGE_BUILT",
            RoundState::WorkersRunning => "WORKERS_RUNNING",
            RoundState::RoundComplete => "ROUND_COMPLETE",
            RoundState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings consumed by the coordinator
#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub length: MessageLength,
    /// Rounds to run; 0 runs until a failure or interrupt
    pub count: u64,
    /// Settle time between `Armed` and the transmit worker start
    pub start_delay: Duration,
    pub verbose: bool,
    pub highlight: Highlight,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            length: MessageLength::UpTo(1024),
            count: 0,
            start_delay: Duration::from_millis(100),
            verbose: false,
            highlight: Highlight::Ansi,
        }
    }
}

/// Outcome of one successful round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
    /// Zero-based round number
    pub index: u64,
    pub message_len: usize,
    pub trunc_len: usize,
}

/// Outcome of a run that reached its configured count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u64,
    pub stats: StatsSnapshot,
}

enum WorkerEvent {
    /// Receive worker has drawn its truncation length
    Armed { trunc_len: usize },
    Done {
        role: Role,
        result: Result<usize, LinkError>,
    },
}

/// Completion report owed by a worker thread.
///
/// Dropped without [`DoneNotice::finish`], i.e. while the worker unwinds, it
/// reports the worker as lost, so the coordinator always gets one `Done` per
/// worker even when the peer keeps its sender alive.
struct DoneNotice {
    role: Role,
    events: Sender<WorkerEvent>,
    sent: bool,
}

impl DoneNotice {
    fn new(role: Role, events: Sender<WorkerEvent>) -> Self {
        Self {
            role,
            events,
            sent: false,
        }
    }

    fn armed(&self, trunc_len: usize) {
        let _ = self.events.send(WorkerEvent::Armed { trunc_len });
    }

    fn finish(mut self, result: Result<usize, LinkError>) {
        self.sent = true;
        let _ = self.events.send(WorkerEvent::Done {
            role: self.role,
            result,
        });
    }
}

impl Drop for DoneNotice {
    fn drop(&mut self) {
        if !self.sent {
            let _ = self.events.send(WorkerEvent::Done {
                role: self.role,
                result: Err(LinkError::WorkerLost { role: self.role }),
            });
        }
    }
}

/// Resources lent to the workers for the duration of a round
struct Link<Tx, Rx> {
    rng: Mt19937,
    tx: Tx,
    rx: Rx,
}

pub struct RoundCoordinator<Tx, Rx> {
    config: RoundConfig,
    stats: Arc<LinkStats>,
    state: RoundState,
    rounds: u64,
    /// `None` while a round is in flight and after an abort
    link: Option<Link<Tx, Rx>>,
}

impl<Tx, Rx> RoundCoordinator<Tx, Rx>
where
    Tx: Write + Send + 'static,
    Rx: Read + Send + 'static,
{
    pub fn new(config: RoundConfig, rng: Mt19937, tx: Tx, rx: Rx, stats: Arc<LinkStats>) -> Self {
        Self {
            config,
            stats,
            state: RoundState::Idle,
            rounds: 0,
            link: Some(Link { rng, tx, rx }),
        }
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Completed rounds
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Run rounds until the configured count is reached or one fails.
    pub fn run(&mut self) -> Result<RunSummary, LinkError> {
        info!(
            length = %self.config.length,
            count = self.config.count,
            start_delay_ms = self.config.start_delay.as_millis() as u64,
            "Starting link test"
        );

        while self.config.count == 0 || self.rounds < self.config.count {
            self.run_round()?;
        }

        Ok(RunSummary {
            rounds: self.rounds,
            stats: self.stats.snapshot(),
        })
    }

    /// Run exactly one round.
    ///
    /// # Panics
    ///
    /// Panics if called after a round has failed.
    pub fn run_round(&mut self) -> Result<RoundReport, LinkError> {
        assert!(
            !self.state.is_terminal(),
            "round coordinator used after abort"
        );

        match self.try_round() {
            Ok(report) => Ok(report),
            Err(e) => {
                self.transition(RoundState::Aborted);
                error!(round = self.rounds, code = e.code(), error = %e, "Round aborted");
                Err(e)
            }
        }
    }

    fn try_round(&mut self) -> Result<RoundReport, LinkError> {
        let index = self.rounds;
        let Some(Link { mut rng, tx, rx }) = self.link.take() else {
            unreachable!("link resources are present whenever the coordinator is not aborted");
        };

        // Idle -> MessageBuilt
        let message = Arc::new(Message::build(&mut rng, self.config.length));
        self.transition(RoundState::MessageBuilt);

        // MessageBuilt -> WorkersRunning
        let (events_tx, events) = mpsc::channel();
        let rx_handle = self.spawn_receiver(message.clone(), rng, rx, events_tx.clone())?;
        self.transition(RoundState::WorkersRunning);

        let trunc_len = match events.recv() {
            Ok(WorkerEvent::Armed { trunc_len }) => trunc_len,
            Ok(WorkerEvent::Done {
                result: Err(e), ..
            }) => return Err(e),
            Ok(WorkerEvent::Done { role, .. }) => return Err(LinkError::WorkerLost { role }),
            Err(_) => {
                return Err(LinkError::WorkerLost {
                    role: Role::Receive,
                });
            }
        };
        trace!(trunc_len, "receiver armed");

        if !self.config.start_delay.is_zero() {
            thread::sleep(self.config.start_delay);
        }
        let tx_handle = self.spawn_transmitter(message.clone(), tx, events_tx)?;

        // First failure wins; the peer may be blocked in I/O forever, so it
        // is left behind rather than joined.
        let mut pending = 2;
        while pending > 0 {
            match events.recv() {
                Ok(WorkerEvent::Done { result: Ok(_), .. }) => pending -= 1,
                Ok(WorkerEvent::Done {
                    result: Err(e), ..
                }) => return Err(e),
                Ok(WorkerEvent::Armed { .. }) => {}
                Err(_) => return Err(Self::lost_worker(rx_handle, tx_handle)),
            }
        }

        // WorkersRunning -> RoundComplete
        let (rng, mut rx) = rx_handle.join().map_err(|_| LinkError::WorkerLost {
            role: Role::Receive,
        })?;
        let tx = tx_handle.join().map_err(|_| LinkError::WorkerLost {
            role: Role::Transmit,
        })?;
        self.transition(RoundState::RoundComplete);

        // RoundComplete -> Idle: the untruncated tail is still on the link.
        // The round only counts once the link is clean for the next one.
        let tail = message.len() - trunc_len;
        if tail > 0 {
            worker::discard_exact(Role::Receive, &mut rx, tail)?;
            self.stats.add_discarded_bytes(tail);
        }
        self.stats.incr_messages();
        self.rounds += 1;
        self.link = Some(Link { rng, tx, rx });
        self.transition(RoundState::Idle);

        debug!(
            round = index,
            message_len = message.len(),
            trunc_len,
            "Round complete"
        );

        Ok(RoundReport {
            index,
            message_len: message.len(),
            trunc_len,
        })
    }

    fn worker_context(&self, role: Role) -> WorkerContext {
        WorkerContext {
            role,
            stats: self.stats.clone(),
            verbose: self.config.verbose,
            highlight: self.config.highlight,
        }
    }

    fn spawn_receiver(
        &self,
        message: Arc<Message>,
        mut rng: Mt19937,
        mut rx: Rx,
        events: Sender<WorkerEvent>,
    ) -> Result<JoinHandle<(Mt19937, Rx)>, LinkError> {
        let ctx = self.worker_context(Role::Receive);
        thread::Builder::new()
            .name("fifotest-rx".to_string())
            .spawn(move || {
                let notice = DoneNotice::new(ctx.role, events);
                let result = worker::receive(&ctx, &message, &mut rng, &mut rx, |trunc_len| {
                    notice.armed(trunc_len)
                });
                notice.finish(result);
                (rng, rx)
            })
            .map_err(|source| LinkError::Io {
                role: Role::Receive,
                source,
            })
    }

    fn spawn_transmitter(
        &self,
        message: Arc<Message>,
        mut tx: Tx,
        events: Sender<WorkerEvent>,
    ) -> Result<JoinHandle<Tx>, LinkError> {
        let ctx = self.worker_context(Role::Transmit);
        thread::Builder::new()
            .name("fifotest-tx".to_string())
            .spawn(move || {
                let notice = DoneNotice::new(ctx.role, events);
                notice.finish(worker::transmit(&ctx, &message, &mut tx));
                tx
            })
            .map_err(|source| LinkError::Io {
                role: Role::Transmit,
                source,
            })
    }

    /// Both event senders are gone without a completion report.
    fn lost_worker(rx_handle: JoinHandle<(Mt19937, Rx)>, tx_handle: JoinHandle<Tx>) -> LinkError {
        let role = if rx_handle.join().is_err() {
            Role::Receive
        } else {
            let _ = tx_handle.join();
            Role::Transmit
        };
        LinkError::WorkerLost { role }
    }

    fn transition(&mut self, next: RoundState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal round transition {} -> {}",
            self.state,
            next
        );
        trace!(from = %self.state, to = %next, "round state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{self, LoopbackConfig, PipeWriter};
    use std::io;

    fn config(length: MessageLength, count: u64) -> RoundConfig {
        RoundConfig {
            length,
            count,
            start_delay: Duration::from_millis(1),
            verbose: false,
            highlight: Highlight::Plain,
        }
    }

    #[test]
    fn test_state_transitions() {
        use RoundState::*;
        assert!(Idle.can_advance_to(MessageBuilt));
        assert!(MessageBuilt.can_advance_to(WorkersRunning));
        assert!(WorkersRunning.can_advance_to(RoundComplete));
        assert!(RoundComplete.can_advance_to(Idle));
        assert!(WorkersRunning.can_advance_to(Aborted));

        assert!(!Idle.can_advance_to(WorkersRunning));
        assert!(!RoundComplete.can_advance_to(MessageBuilt));
        assert!(!Aborted.can_advance_to(Idle));
        assert!(!Aborted.can_advance_to(Aborted));

        assert!(Aborted.is_terminal());
        assert!(!Idle.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RoundState::WorkersRunning.to_string(), "WORKERS_RUNNING");
    }

    #[test]
    fn test_single_round_over_loopback() {
        let (tx, rx) = loopback::pipe();
        let stats = Arc::new(LinkStats::new());
        let mut coord = RoundCoordinator::new(
            config(MessageLength::UpTo(64), 1),
            Mt19937::new(1),
            tx,
            rx,
            stats.clone(),
        );

        let report = coord.run_round().unwrap();
        assert_eq!(report.index, 0);
        assert!((1..=report.message_len).contains(&report.trunc_len));
        assert_eq!(coord.state(), RoundState::Idle);

        let snap = stats.snapshot();
        assert_eq!(snap.messages, 1);
        assert_eq!(snap.tx_bytes, report.message_len as u64);
        assert_eq!(snap.rx_bytes, report.trunc_len as u64);
        assert_eq!(
            snap.discarded_bytes,
            (report.message_len - report.trunc_len) as u64
        );
    }

    #[test]
    fn test_run_stops_at_count() {
        let (tx, rx) = loopback::pipe_with(LoopbackConfig::chunked(7));
        let mut coord = RoundCoordinator::new(
            config(MessageLength::UpTo(32), 5),
            Mt19937::new(9),
            tx,
            rx,
            Arc::new(LinkStats::new()),
        );
        let summary = coord.run().unwrap();
        assert_eq!(summary.rounds, 5);
        assert_eq!(summary.stats.messages, 5);
    }

    #[test]
    fn test_mismatch_aborts() {
        // Corrupt the very first byte: always inside the verified prefix
        let (tx, rx) = loopback::pipe_with(LoopbackConfig::default().with_corruption(0, 0x80));
        let mut coord = RoundCoordinator::new(
            config(MessageLength::Fixed(16), 3),
            Mt19937::new(5),
            tx,
            rx,
            Arc::new(LinkStats::new()),
        );
        let err = coord.run().unwrap_err();
        assert!(matches!(err, LinkError::Mismatch { mismatches: 1, .. }));
        assert_eq!(coord.state(), RoundState::Aborted);
        assert_eq!(coord.rounds(), 0);
    }

    /// Forwards the first `keep` bytes, then closes the link and swallows the rest
    struct CutAfter {
        inner: Option<PipeWriter>,
        keep: usize,
    }

    impl Write for CutAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.keep);
            if let Some(inner) = self.inner.as_mut() {
                inner.write_all(&buf[..n])?;
            }
            self.keep -= n;
            if self.keep == 0 {
                self.inner = None;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_tail_drain_does_not_count_round() {
        let length = MessageLength::Fixed(64);
        // A seed whose first truncation leaves a tail to drain
        let (seed, trunc_len) = (1..1000)
            .find_map(|seed| {
                let mut rng = Mt19937::new(seed);
                let msg = Message::build(&mut rng, length);
                let trunc = rng.next_range(1, msg.len() as u32) as usize;
                (trunc < msg.len()).then_some((seed, trunc))
            })
            .unwrap();

        let (writer, rx) = loopback::pipe();
        let tx = CutAfter {
            inner: Some(writer),
            keep: trunc_len,
        };
        let stats = Arc::new(LinkStats::new());
        let mut coord =
            RoundCoordinator::new(config(length, 1), Mt19937::new(seed), tx, rx, stats.clone());

        let err = coord.run_round().unwrap_err();
        assert!(matches!(err, LinkError::ReadClosed { received: 0, .. }));
        assert_eq!(coord.state(), RoundState::Aborted);
        assert_eq!(coord.rounds(), 0);

        let snap = stats.snapshot();
        assert_eq!(snap.messages, 0);
        assert_eq!(snap.discarded_bytes, 0);
        assert_eq!(snap.rx_bytes, trunc_len as u64);
    }

    /// Writer whose driver crashes on first use
    struct Faulty;

    impl Write for Faulty {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            panic!("transmit driver fault");
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_transmit_panic_reported_while_receiver_blocked() {
        // Nobody writes to this pipe: the receiver stays blocked in read
        let (idle_writer, rx) = loopback::pipe();
        let (done_tx, done) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let mut coord = RoundCoordinator::new(
                config(MessageLength::UpTo(32), 1),
                Mt19937::new(2),
                Faulty,
                rx,
                Arc::new(LinkStats::new()),
            );
            let _ = done_tx.send(coord.run_round());
        });

        let result = done
            .recv_timeout(Duration::from_secs(5))
            .expect("coordinator must report the lost worker");
        assert!(matches!(
            result,
            Err(LinkError::WorkerLost {
                role: Role::Transmit
            })
        ));
        drop(idle_writer);
    }

    #[test]
    #[should_panic(expected = "used after abort")]
    fn test_round_after_abort_panics() {
        let (tx, rx) = loopback::pipe_with(LoopbackConfig::default().with_corruption(0, 1));
        let mut coord = RoundCoordinator::new(
            config(MessageLength::Fixed(4), 0),
            Mt19937::new(5),
            tx,
            rx,
            Arc::new(LinkStats::new()),
        );
        let _ = coord.run_round();
        let _ = coord.run_round();
    }
}
