//! Operator interrupt watcher
//!
//! The link workers block in plain `read`/`write` calls that cannot be
//! cancelled, so an interrupt is handled out of band: a dedicated thread runs
//! a small current-thread runtime that waits for SIGINT or SIGTERM and then
//! hands control to a callback. The callback is expected to report and exit.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use tokio::runtime::Builder;
use tracing::info;

/// Which signal ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    CtrlC,
    Terminate,
}

impl Interrupt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interrupt::CtrlC => "SIGINT",
            Interrupt::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit status used after an operator interrupt (128 + SIGINT)
pub const INTERRUPT_EXIT_CODE: u8 = 130;

/// Install signal listeners and spawn the watcher thread.
///
/// Listeners are registered before this returns, so a signal delivered right
/// after the call is not lost.
#[cfg(unix)]
pub fn spawn_interrupt_watcher<F>(on_interrupt: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Interrupt) + Send + 'static,
{
    use tokio::signal::unix::{SignalKind, signal};

    let rt = Builder::new_current_thread().enable_all().build()?;
    let (mut sigint, mut sigterm) = rt.block_on(async {
        Ok::<_, io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    })?;

    thread::Builder::new()
        .name("fifotest-signal".to_string())
        .spawn(move || {
            let which = rt.block_on(async {
                tokio::select! {
                    _ = sigint.recv() => Interrupt::CtrlC,
                    _ = sigterm.recv() => Interrupt::Terminate,
                }
            });
            info!(signal = %which, "Interrupted");
            on_interrupt(which);
        })
}

#[cfg(not(unix))]
pub fn spawn_interrupt_watcher<F>(on_interrupt: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Interrupt) + Send + 'static,
{
    let rt = Builder::new_current_thread().enable_all().build()?;

    thread::Builder::new()
        .name("fifotest-signal".to_string())
        .spawn(move || {
            if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
                info!(signal = %Interrupt::CtrlC, "Interrupted");
                on_interrupt(Interrupt::CtrlC);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Interrupt::CtrlC.to_string(), "SIGINT");
        assert_eq!(Interrupt::Terminate.as_str(), "SIGTERM");
    }

    #[test]
    fn test_watcher_spawns_without_firing() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn_interrupt_watcher(move |which| {
            let _ = tx.send(which);
        })
        .unwrap();
        assert!(!handle.is_finished());
        assert!(
            rx.recv_timeout(std::time::Duration::from_millis(20))
                .is_err()
        );
    }
}
