//! Byte stream sources for device links.
//!
//! Provides a unified blocking interface over the physical channels that
//! device controllers are reached through:
//! - TCP sockets (network receivers, serial-over-TCP gateways)
//! - Unix stream sockets (local bridges, loopback pairs for tests)
//! - POSIX serial lines (RS-232/RS-485 adapters)
//!
//! This is the lowest layer of devlink. Everything else builds on top of
//! the [`StreamSource`] trait and the [`DeviceStream`] type provided here.
//! Retry and reconnection policy lives above this crate.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod serial;
pub mod tcp;

pub use error::{Result, TransportError};
pub use traits::{DeviceStream, StreamSource};

#[cfg(unix)]
pub use serial::{DataBits, Parity, SerialPort, SerialSettings, StopBits};
pub use tcp::{connect_tcp, DEFAULT_CONNECT_TIMEOUT};
