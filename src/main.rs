//! fifotest - serial link integrity tester
//!
//! ```text
//! ┌──────────┐  Message  ┌──────────┐  TXDEV ═══ link ═══ RXDEV  ┌──────────┐
//! │ Mt19937  │──────────▶│ tx worker│ ─────────────────────────▶ │ rx worker│──▶ diff
//! └──────────┘           └──────────┘                            └──────────┘
//!      ▲                                                               │
//!      └──────────────── truncation draw (after the message) ──────────┘
//! ```
//!
//! Prints `messages=N tx_bytes=T rx_bytes=R` on exit. Exit status is 0 after
//! the configured number of rounds, 1 on any link or setup failure and 130
//! after an interrupt.

#[cfg(not(unix))]
compile_error!("fifotest drives termios endpoints and needs a unix target");

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use fifotest::config::AppConfig;
use fifotest::device::{self, DeviceSettings};
use fifotest::interrupt::{self, INTERRUPT_EXIT_CODE};
use fifotest::logging::init_logging;
use fifotest::{LinkStats, Mt19937, RoundCoordinator};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Send pseudo-random messages from TXDEV and verify them on RXDEV
#[derive(Parser, Debug)]
#[command(name = "fifotest", version = VERSION)]
struct Cli {
    /// Transmit device or FIFO
    #[arg(value_name = "TXDEV")]
    tx_dev: String,

    /// Receive device or FIFO
    #[arg(value_name = "RXDEV")]
    rx_dev: String,

    /// Generator seed (0 = derive from the clock)
    #[arg(short = 'i', long)]
    seed: Option<u32>,

    /// Maximum message length in bytes (1..=4096)
    #[arg(short = 'l', long = "len")]
    max_len: Option<u32>,

    /// Send every message at exactly --len bytes
    #[arg(long)]
    fixed_len: bool,

    /// Number of messages (0 = until failure or interrupt)
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Baud rate for tty endpoints
    #[arg(short = 's', long)]
    speed: Option<u32>,

    /// Dump messages and log every verified round
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Delay between arming the receiver and starting the transmitter
    #[arg(long, value_name = "MS")]
    start_delay_ms: Option<u64>,

    /// Plain markers instead of ANSI color in mismatch dumps
    #[arg(long)]
    no_color: bool,

    /// YAML config file; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        let link = &mut config.link;
        if let Some(seed) = self.seed {
            link.seed = seed;
        }
        if let Some(max_len) = self.max_len {
            link.max_len = max_len;
        }
        if let Some(count) = self.count {
            link.count = count;
        }
        if let Some(delay) = self.start_delay_ms {
            link.start_delay_ms = delay;
        }
        if self.speed.is_some() {
            link.speed = self.speed;
        }
        link.fixed_len |= self.fixed_len;
        link.verbose |= self.verbose;
        link.color &= !self.no_color;
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    config.link.validate()?;

    let _log_guard = init_logging(&config.log, config.link.verbose)?;
    info!(version = VERSION, tx = %cli.tx_dev, rx = %cli.rx_dev, "fifotest starting");

    let seed = config.link.effective_seed();
    if seed != config.link.seed {
        info!(seed, "Using clock-derived seed");
    } else {
        info!(seed, "Using seed");
    }

    let stats = Arc::new(LinkStats::new());
    let watcher_stats = stats.clone();
    interrupt::spawn_interrupt_watcher(move |_| {
        if let Some(snapshot) = watcher_stats.finish() {
            println!("{snapshot}");
        }
        std::process::exit(INTERRUPT_EXIT_CODE.into());
    })
    .context("failed to install signal handlers")?;

    let settings = DeviceSettings {
        raw: true,
        speed: config.link.speed,
    };
    let pair = device::open_pair(&cli.tx_dev, &cli.rx_dev, &settings)?;

    let mut coordinator = RoundCoordinator::new(
        config.link.round_config(),
        Mt19937::new(seed),
        pair.tx,
        pair.rx,
        stats.clone(),
    );
    let outcome = coordinator.run();

    let code = match &outcome {
        Ok(summary) => {
            info!(rounds = summary.rounds, "Link test passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.code(), "Link test failed: {e}");
            ExitCode::FAILURE
        }
    };

    match stats.finish() {
        Some(snapshot) => {
            println!("{snapshot}");
            Ok(code)
        }
        // The interrupt watcher got there first and is exiting the process
        None => Ok(ExitCode::from(INTERRUPT_EXIT_CODE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "fifotest", "/dev/ttyS0", "/dev/ttyS1", "-i", "7", "-l", "64", "--fixed-len", "-n",
            "3", "--no-color",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.link.seed, 7);
        assert_eq!(config.link.max_len, 64);
        assert!(config.link.fixed_len);
        assert_eq!(config.link.count, 3);
        assert!(!config.link.color);
        // Untouched
        assert_eq!(config.link.start_delay_ms, 100);
        assert!(config.link.speed.is_none());
    }

    #[test]
    fn test_cli_requires_both_devices() {
        assert!(Cli::try_parse_from(["fifotest", "/dev/ttyS0"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
