//! Device endpoints
//!
//! Opens the transmit path write-only and the receive path read-only, then
//! puts tty endpoints into raw mode at the requested speed and discards
//! whatever was queued before the run. Non-tty endpoints (FIFOs, pipes) are
//! used as they are.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::panic;
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info};

use crate::error::DeviceError;

/// Numeric baud rate to termios speed constant
const BAUD_TABLE: &[(u32, libc::speed_t)] = &[
    (0, libc::B0),
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (460800, libc::B460800),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (500000, libc::B500000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (576000, libc::B576000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (921600, libc::B921600),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (1000000, libc::B1000000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (1152000, libc::B1152000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (1500000, libc::B1500000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (2000000, libc::B2000000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (2500000, libc::B2500000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (3000000, libc::B3000000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (3500000, libc::B3500000),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (4000000, libc::B4000000),
];

pub fn speed_symbol(baud: u32) -> Option<libc::speed_t> {
    BAUD_TABLE
        .iter()
        .find(|(value, _)| *value == baud)
        .map(|(_, symbol)| *symbol)
}

pub fn speed_value(symbol: libc::speed_t) -> Option<u32> {
    BAUD_TABLE
        .iter()
        .find(|(_, s)| *s == symbol)
        .map(|(value, _)| *value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Switch tty endpoints to raw mode
    pub raw: bool,
    /// Baud rate; keep the current one when unset
    pub speed: Option<u32>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            raw: true,
            speed: None,
        }
    }
}

#[derive(Debug)]
pub struct DevicePair {
    pub tx: File,
    pub rx: File,
}

/// Open both endpoints and configure them.
///
/// The two opens run on separate threads: opening one end of a FIFO blocks
/// until the other end is opened, and both ends may be the same FIFO. The
/// first failure is returned at once; an opener still blocked on its FIFO is
/// left behind.
pub fn open_pair(
    tx_path: &str,
    rx_path: &str,
    settings: &DeviceSettings,
) -> Result<DevicePair, DeviceError> {
    if let Some(speed) = settings.speed {
        speed_symbol(speed).ok_or(DeviceError::UnknownSpeed(speed))?;
    }

    let (opened_tx, opened) = mpsc::channel();
    spawn_opener(tx_path, Access::Write, *settings, opened_tx.clone())?;
    spawn_opener(rx_path, Access::Read, *settings, opened_tx)?;

    let (mut tx, mut rx) = (None, None);
    for _ in 0..2 {
        let (access, result) = opened
            .recv()
            .map_err(|_| DeviceError::OpenPanicked(format!("{tx_path}, {rx_path}")))?;
        let file = result?;
        match access {
            Access::Write => tx = Some(file),
            Access::Read => rx = Some(file),
        }
    }

    match (tx, rx) {
        (Some(tx), Some(rx)) => Ok(DevicePair { tx, rx }),
        _ => Err(DeviceError::OpenPanicked(format!("{tx_path}, {rx_path}"))),
    }
}

type OpenResult = (Access, Result<File, DeviceError>);

fn spawn_opener(
    path: &str,
    access: Access,
    settings: DeviceSettings,
    opened: mpsc::Sender<OpenResult>,
) -> Result<(), DeviceError> {
    let owned_path = path.to_string();
    thread::Builder::new()
        .name(format!("fifotest-open-{}", access.as_str()))
        .spawn(move || {
            let result = panic::catch_unwind(|| open_endpoint(&owned_path, access, &settings))
                .unwrap_or_else(|_| Err(DeviceError::OpenPanicked(owned_path.clone())));
            let _ = opened.send((access, result));
        })
        .map(|_| ())
        .map_err(|source| DeviceError::Open {
            path: path.to_string(),
            access: access.as_str(),
            source,
        })
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "reading",
            Access::Write => "writing",
        }
    }
}

fn open_endpoint(path: &str, access: Access, settings: &DeviceSettings) -> Result<File, DeviceError> {
    let file = match access {
        Access::Read => OpenOptions::new().read(true).open(path),
        Access::Write => OpenOptions::new().write(true).open(path),
    }
    .map_err(|source| DeviceError::Open {
        path: path.to_string(),
        access: access.as_str(),
        source,
    })?;

    configure_tty(&file, path, settings)?;
    debug!(path, access = access.as_str(), "endpoint open");
    Ok(file)
}

fn termios_error(op: &'static str, path: &str) -> DeviceError {
    DeviceError::Termios {
        op,
        path: path.to_string(),
        source: io::Error::last_os_error(),
    }
}

fn configure_tty(file: &File, path: &str, settings: &DeviceSettings) -> Result<(), DeviceError> {
    let fd = file.as_raw_fd();

    let mut tio = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: fd is open for the lifetime of `file`; tcgetattr fills `tio` on success
    if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOTTY) {
            info!(path, "not a tty, skipping tty config");
            return Ok(());
        }
        return Err(DeviceError::Termios {
            op: "tcgetattr",
            path: path.to_string(),
            source: err,
        });
    }
    // SAFETY: initialised by the successful tcgetattr above
    let mut tio = unsafe { tio.assume_init() };

    if settings.raw {
        unsafe { libc::cfmakeraw(&mut tio) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            return Err(termios_error("tcsetattr", path));
        }
    }

    match settings.speed {
        Some(baud) => {
            let symbol = speed_symbol(baud).ok_or(DeviceError::UnknownSpeed(baud))?;
            if unsafe { libc::cfsetspeed(&mut tio, symbol) } != 0 {
                return Err(termios_error("cfsetspeed", path));
            }
            if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
                return Err(termios_error("tcsetattr", path));
            }
            debug!(path, baud, "speed set");
        }
        None => {
            let (ispeed, ospeed) = unsafe { (libc::cfgetispeed(&tio), libc::cfgetospeed(&tio)) };
            debug!(
                path,
                ispeed = ?speed_value(ispeed),
                ospeed = ?speed_value(ospeed),
                "current speed"
            );
        }
    }

    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } != 0 {
        return Err(termios_error("tcflush", path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::io::{Read, Write};
    use std::path::PathBuf;

    fn fifo_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fifotest-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        let c_path = CString::new(path.to_string_lossy().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
        path
    }

    #[test]
    fn test_baud_table_lookup() {
        assert_eq!(speed_symbol(9600), Some(libc::B9600));
        assert_eq!(speed_symbol(115200), Some(libc::B115200));
        assert_eq!(speed_symbol(12345), None);
        assert_eq!(speed_value(libc::B38400), Some(38400));
    }

    #[test]
    fn test_unknown_speed_rejected_before_open() {
        let settings = DeviceSettings {
            speed: Some(12345),
            ..Default::default()
        };
        let err = open_pair("/nonexistent/tx", "/nonexistent/rx", &settings).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownSpeed(12345)));
    }

    #[test]
    fn test_open_missing_path() {
        let err = open_pair("/nonexistent/tx", "/nonexistent/rx", &DeviceSettings::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
    }

    #[test]
    fn test_open_same_fifo_both_ends() {
        let path = fifo_path("pair");
        let path_str = path.to_string_lossy().into_owned();

        let mut pair = open_pair(&path_str, &path_str, &DeviceSettings::default()).unwrap();
        pair.tx.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        pair.rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        drop(pair);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_failed_open_does_not_wait_for_fifo_peer() {
        let path = fifo_path("half");
        let path_str = path.to_string_lossy().into_owned();

        let (done_tx, done) = std::sync::mpsc::channel();
        let rx_path = path_str.clone();
        thread::spawn(move || {
            let _ = done_tx.send(open_pair("/nonexistent/tx", &rx_path, &DeviceSettings::default()));
        });

        let result = done
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("open_pair must return while the FIFO reader is still blocked");
        assert!(matches!(
            result,
            Err(DeviceError::Open {
                access: "writing",
                ..
            })
        ));

        // Release the opener still blocked on the read end
        let _ = OpenOptions::new().write(true).open(&path);
        let _ = std::fs::remove_file(&path);
    }
}
