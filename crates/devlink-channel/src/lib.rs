//! Request/response transactions and event dispatch over device links.
//!
//! A [`Channel`] owns one stream source and three worker threads: a reader
//! feeding the stream buffer, a decoder running the protocol's scanner,
//! validator and codec, and a dispatcher delivering unsolicited messages to
//! listeners. Each decoded message goes either to the pending transaction
//! it answers or to the listeners, never both.

pub mod cache;
pub mod channel;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod transaction;

pub use cache::MessageCache;
pub use channel::Channel;
pub use config::{BusyPolicy, ChannelConfig};
#[cfg(unix)]
pub use connector::{open_loopback, open_serial};
pub use connector::connect_tcp;
pub use dispatcher::EventDispatcher;
pub use error::{ChannelError, Result};
pub use devlink_frame::StreamError;
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use transaction::{Ticket, TransactionCoordinator, TransactionId};
