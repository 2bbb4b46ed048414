use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Connect timeout used when the caller does not supply one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to a TCP device endpoint (network receiver, serial gateway).
///
/// Every resolved address is tried in order until one accepts within
/// `timeout`. Nagle is disabled so short command frames go out immediately.
pub fn connect_tcp(addr: &str, timeout: Duration) -> Result<DeviceStream> {
    let addrs = addr
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;

    let mut last_err = None;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%candidate, "connected to tcp endpoint");
                return Ok(DeviceStream::from_tcp(stream));
            }
            Err(e) => {
                debug!(%candidate, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(TransportError::Connect {
        addr: addr.to_string(),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address resolved to no endpoints",
            )
        }),
    })
}
