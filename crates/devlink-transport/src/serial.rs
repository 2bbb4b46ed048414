use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Upper bound on a single `poll(2)` wait, so `shutdown` is observed promptly.
const SHUTDOWN_POLL_SLICE: Duration = Duration::from_millis(50);

/// Character size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(format!("unsupported data bits: {other}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("unsupported stop bits: {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Line settings applied when a serial port is opened.
///
/// Defaults to 9600 8N1, the common factory setting of AV receivers and
/// field-bus adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialSettings {
    /// Settings with the given baud rate and 8N1 framing.
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }
}

/// A POSIX serial line opened in raw mode.
///
/// Reads wait with `poll(2)` so the configured read timeout applies even
/// though the tty itself is blocking. All clones share one closed flag:
/// after [`SerialPort::shutdown`] every pending or future read returns EOF.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    closed: Arc<AtomicBool>,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
}

impl SerialPort {
    /// Open `path` and apply `settings`.
    pub fn open(path: impl AsRef<Path>, settings: &SerialSettings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(settings.baud_rate).ok_or_else(|| TransportError::Configure {
            path: path.clone(),
            reason: format!("unsupported baud rate {}", settings.baud_rate),
        })?;

        // O_NONBLOCK keeps open() from waiting on carrier detect; it is cleared
        // once CLOCAL is set.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| TransportError::Open {
                path: path.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();
        configure_raw(fd, speed, settings).map_err(|e| TransportError::Configure {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        clear_nonblocking(fd).map_err(|e| TransportError::Configure {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        info!(?path, baud = settings.baud_rate, "opened serial port");

        Ok(Self {
            file,
            path,
            closed: Arc::new(AtomicBool::new(false)),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
        })
    }

    /// Open `path` and wrap it as a [`DeviceStream`].
    pub fn open_stream(path: impl AsRef<Path>, settings: &SerialSettings) -> Result<DeviceStream> {
        Self::open(path, settings).map(DeviceStream::from_serial)
    }

    /// Device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            closed: Arc::clone(&self.closed),
            read_timeout: Mutex::new(self.read_timeout()),
            write_timeout: Mutex::new(self.write_timeout()),
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self
            .write_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    /// Mark the port closed on every clone. Blocked readers wake within one
    /// poll slice and report EOF.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(path = ?self.path, "serial port shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn read_timeout(&self) -> Option<Duration> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_timeout(&self) -> Option<Duration> {
        *self
            .write_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the descriptor is ready for `events`.
    ///
    /// Returns `Ok(false)` once the port is shut down.
    fn wait_ready(&self, events: libc::c_short, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_closed() {
                return Ok(false);
            }

            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "serial operation timed out",
                        ));
                    }
                    remaining.min(SHUTDOWN_POLL_SLICE)
                }
                None => SHUTDOWN_POLL_SLICE,
            };

            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events,
                revents: 0,
            };
            let millis = libc::c_int::try_from(slice.as_millis()).unwrap_or(libc::c_int::MAX);
            // SAFETY: `pfd` is a single valid pollfd that lives for the call.
            let ready = unsafe { libc::poll(&mut pfd, 1, millis.max(1)) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ready == 0 {
                continue;
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "serial descriptor is no longer valid",
                ));
            }
            return Ok(true);
        }
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.wait_ready(libc::POLLIN, self.read_timeout())? {
                return Ok(0);
            }
            match self.file.read(buf) {
                // VMIN=0 lets a raw tty report zero bytes after a spurious wakeup.
                Ok(0) if !self.is_closed() => {
                    let mut pfd = libc::pollfd {
                        fd: self.file.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    };
                    // SAFETY: `pfd` is a single valid pollfd that lives for the call.
                    unsafe { libc::poll(&mut pfd, 1, 0) };
                    if pfd.revents & libc::POLLHUP != 0 {
                        return Ok(0);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.wait_ready(libc::POLLOUT, self.write_timeout())? {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port shut down",
            ));
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

fn configure_raw(fd: RawFd, speed: libc::speed_t, settings: &SerialSettings) -> io::Result<()> {
    // SAFETY: termios is plain old data; tcgetattr fully initializes it.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open descriptor owned by the caller and `tio` is valid.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialized by tcgetattr above.
    unsafe { libc::cfmakeraw(&mut tio) };

    tio.c_cflag |= libc::CREAD | libc::CLOCAL;
    tio.c_cflag &= !libc::CSIZE;
    tio.c_cflag |= match settings.data_bits {
        DataBits::Five => libc::CS5,
        DataBits::Six => libc::CS6,
        DataBits::Seven => libc::CS7,
        DataBits::Eight => libc::CS8,
    };
    match settings.parity {
        Parity::None => tio.c_cflag &= !(libc::PARENB | libc::PARODD),
        Parity::Even => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag &= !libc::PARODD;
        }
        Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
    }
    match settings.stop_bits {
        StopBits::One => tio.c_cflag &= !libc::CSTOPB,
        StopBits::Two => tio.c_cflag |= libc::CSTOPB,
    }
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `tio` is initialized and `speed` is a valid B* constant.
    unsafe {
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    // SAFETY: `fd` is open and `tio` is a fully initialized termios.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn clear_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL only read and write descriptor flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
