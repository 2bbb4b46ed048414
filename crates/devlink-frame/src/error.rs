/// A candidate frame start was rejected while scanning.
///
/// Always recoverable: the scanner discards the candidate's first byte and
/// resumes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The candidate does not begin with the protocol's sync marker.
    #[error("no frame marker at candidate start")]
    NoMarker,

    /// A fixed header field does not hold its required constant.
    #[error("header field {field} mismatch (expected {expected}, got {actual})")]
    HeaderMismatch {
        field: &'static str,
        expected: u32,
        actual: u32,
    },

    /// A declared length is zero or exceeds the protocol maximum.
    #[error("absurd declared length {declared} (max {max})")]
    AbsurdLength { declared: usize, max: usize },

    /// The function/command code has no known frame shape.
    #[error("unknown function code 0x{0:02X}")]
    UnknownFunction(u8),

    /// No terminator appeared within the maximum frame length.
    #[error("frame not terminated")]
    Unterminated,

    /// The candidate's start marker byte is missing.
    #[error("missing start marker")]
    MissingStartMarker,

    /// A start marker appeared inside the candidate; a new frame begins
    /// there.
    #[error("start marker inside frame at offset {offset}")]
    MarkerInFrame { offset: usize },
}

/// A complete candidate frame failed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("checksum mismatch (computed 0x{computed:04X}, received 0x{received:04X})")]
    Checksum { computed: u16, received: u16 },

    #[error("length mismatch (declared {declared}, captured {captured})")]
    Length { declared: usize, captured: usize },

    #[error("invalid frame terminator")]
    Terminator,

    #[error("malformed frame body: {0}")]
    Body(&'static str),
}

/// A validated frame does not map to any known message shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame payload too short ({have} bytes, need {need})")]
    TooShort { have: usize, need: usize },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// An outgoing message cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failures of [`StreamBuffer`](crate::StreamBuffer) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The deadline passed before enough bytes arrived.
    #[error("timed out waiting for buffered bytes")]
    Timeout,

    /// The buffer is closed and cannot satisfy the request.
    #[error("stream buffer closed")]
    Closed,

    /// Incoming bytes were dropped because the buffer stayed full.
    #[error("stream buffer overflow ({dropped} bytes dropped)")]
    Overflow { dropped: usize },

    /// The request can never be satisfied by a buffer of this size.
    #[error("request of {requested} bytes exceeds buffer capacity {capacity}")]
    TooLarge { requested: usize, capacity: usize },
}

/// Why the underlying byte stream ended. Fatal for everything reading it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Closed locally.
    #[error("closed")]
    Closed,

    /// The far end hung up.
    #[error("end of stream")]
    Eof,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Umbrella error for the frame layer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl FrameError {
    /// Whether the decode loop absorbs this error and keeps scanning.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Framing(_) | Self::Validation(_) | Self::Decode(_) => true,
            Self::Buffer(err) => matches!(err, BufferError::Timeout | BufferError::Overflow { .. }),
            Self::Encode(_) | Self::Stream(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
