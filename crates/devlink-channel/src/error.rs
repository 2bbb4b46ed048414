use std::time::Duration;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] devlink_transport::TransportError),

    /// The request could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] devlink_frame::EncodeError),

    /// No correlated reply arrived in time. The channel stays usable.
    #[error("transaction timed out after {0:?}")]
    Timeout(Duration),

    /// The channel closed while the transaction was pending.
    #[error("transaction cancelled")]
    Cancelled,

    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// Another transaction is pending and the busy policy is fail-fast.
    #[error("another transaction is pending")]
    Busy,

    /// Inconsistent channel settings.
    #[error("invalid channel config: {0}")]
    Config(String),

    /// I/O error writing to the stream or spawning workers.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
