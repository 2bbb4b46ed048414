use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A byte-producing/consuming channel to a device.
///
/// Implementations must allow one clone to block in `read` while another
/// clone writes, and `shutdown` on any clone must wake a reader blocked on
/// another clone.
pub trait StreamSource: Read + Write + Send + fmt::Debug + 'static {
    /// Create an independent handle to the same underlying channel.
    fn try_clone_source(&self) -> Result<Self>
    where
        Self: Sized;

    /// Bound how long a single `read` call may block.
    ///
    /// `None` blocks until data arrives or the channel closes.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Bound how long a single `write` call may block.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Close both directions and unblock pending reads on every clone.
    fn shutdown(&self) -> Result<()>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// A connected device stream: TCP socket, Unix stream, or serial line.
///
/// This is the concrete source type returned by the connect/open helpers.
pub struct DeviceStream {
    inner: DeviceStreamInner,
}

enum DeviceStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Serial(crate::serial::SerialPort),
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream.flush(),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => port.flush(),
        }
    }
}

impl DeviceStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: DeviceStreamInner::Tcp(stream),
        }
    }

    /// Wrap a connected Unix stream socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: DeviceStreamInner::Unix(stream),
        }
    }

    /// Wrap an opened serial port.
    #[cfg(unix)]
    pub fn from_serial(port: crate::serial::SerialPort) -> Self {
        Self {
            inner: DeviceStreamInner::Serial(port),
        }
    }

    /// Create a connected in-process pair of Unix stream sockets.
    ///
    /// Handy for loopback testing: one end plays the device, the other is
    /// handed to a channel.
    #[cfg(unix)]
    pub fn unix_pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            DeviceStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            DeviceStreamInner::Unix(_) => "unix-stream",
            #[cfg(unix)]
            DeviceStreamInner::Serial(_) => "serial",
        }
    }
}

impl StreamSource for DeviceStream {
    fn try_clone_source(&self) -> Result<Self> {
        let inner = match &self.inner {
            DeviceStreamInner::Tcp(stream) => DeviceStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => DeviceStreamInner::Unix(stream.try_clone()?),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => DeviceStreamInner::Serial(port.try_clone()?),
        };
        Ok(Self { inner })
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => {
                port.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => {
                port.set_write_timeout(timeout);
                Ok(())
            }
        }
    }

    fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => {
                port.shutdown();
                Ok(())
            }
        };
        match result {
            Ok(()) => Ok(()),
            // Already closed by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => match stream.peer_addr() {
                Ok(addr) => format!("tcp://{addr}"),
                Err(_) => "tcp://<disconnected>".to_string(),
            },
            #[cfg(unix)]
            DeviceStreamInner::Unix(_) => "unix-stream".to_string(),
            #[cfg(unix)]
            DeviceStreamInner::Serial(port) => format!("serial://{}", port.path().display()),
        }
    }
}

impl fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
