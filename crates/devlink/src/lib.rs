//! Frame sync, validation and dispatch for serial and network device protocols.
//!
//! devlink turns a noisy byte stream from a device into typed messages, and
//! correlates replies with the requests that asked for them.
//!
//! # Crate Structure
//!
//! - [`transport`]: stream sources (TCP, Unix sockets, serial lines)
//! - [`frame`]: stream buffer, frame scanner, validators and codecs for
//!   eISCP, serial ISCP, Modbus RTU and Rotel HEX
//! - [`channel`]: request/response transactions and listener dispatch over a
//!   live link (behind the `channel` feature)

/// Re-export transport types.
pub mod transport {
    pub use devlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use devlink_frame::*;
}

/// Re-export channel types (requires `channel` feature).
#[cfg(feature = "channel")]
pub mod channel {
    pub use devlink_channel::*;
}
