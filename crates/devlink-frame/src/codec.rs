use std::fmt::Debug;

use bytes::{Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError, FramingError, ValidationError};

/// Where a complete frame ends within a candidate, and how it splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBounds {
    /// Total frame length in bytes.
    pub len: usize,
    /// Bytes before the payload (marker, fixed header fields).
    pub header_len: usize,
    /// Bytes after the payload (CRC, checksum or terminator).
    pub trailer_len: usize,
}

impl FrameBounds {
    pub fn new(len: usize, header_len: usize, trailer_len: usize) -> Self {
        Self {
            len,
            header_len,
            trailer_len,
        }
    }
}

/// What a protocol can tell about a candidate frame so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// At least this many candidate bytes are needed to decide.
    Need(usize),
    /// `fallback` is a complete frame, but a longer trailer might still
    /// complete within `need` bytes.
    Extend { need: usize, fallback: FrameBounds },
    /// The candidate holds a complete frame.
    Complete(FrameBounds),
}

/// Raw bytes of one complete candidate frame.
///
/// Immutable; the header/payload/trailer views are slices of `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Bytes,
    header_len: usize,
    trailer_len: usize,
}

impl RawFrame {
    /// Wrap frame bytes. Header and trailer lengths are clamped to the frame.
    pub fn new(bytes: impl Into<Bytes>, header_len: usize, trailer_len: usize) -> Self {
        let bytes = bytes.into();
        let header_len = header_len.min(bytes.len());
        let trailer_len = trailer_len.min(bytes.len() - header_len);
        Self {
            bytes,
            header_len,
            trailer_len,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..self.bytes.len() - self.trailer_len]
    }

    pub fn trailer(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - self.trailer_len..]
    }

    /// Everything except the trailer, i.e. the usual integrity-check range.
    pub fn without_trailer(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - self.trailer_len]
    }
}

/// Frame synchronization rules of a protocol.
pub trait FrameFormat {
    /// Short protocol name for logs.
    fn name(&self) -> &'static str;

    /// Largest frame the protocol can produce. Must fit the stream buffer.
    fn max_frame_len(&self) -> usize;

    /// Length of the sync marker. After an abandoned candidate, the scanner
    /// skips at most this many bytes.
    fn marker_len(&self) -> usize;

    /// Inspect the bytes of a candidate starting at its first byte.
    ///
    /// `candidate` is never empty.
    fn probe(&self, candidate: &[u8]) -> Result<Probe, FramingError>;
}

/// Integrity check of a complete candidate frame.
pub trait FrameValidator {
    fn validate(&self, frame: &RawFrame) -> Result<(), ValidationError>;
}

/// Conversion between validated frames and typed messages.
pub trait MessageCodec {
    type Message: Clone + Debug + Send + 'static;

    fn decode(&self, frame: &RawFrame) -> Result<Self::Message, DecodeError>;

    /// Append the complete wire frame for `message` to `dst`, including its
    /// integrity trailer. Nothing is appended on error.
    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), EncodeError>;

    /// Whether `reply` answers `request`. The default takes the next frame.
    fn correlates(&self, _request: &Self::Message, _reply: &Self::Message) -> bool {
        true
    }
}

/// A complete protocol: framing, validation and message codec.
pub trait Protocol:
    FrameFormat + FrameValidator + MessageCodec + Send + Sync + 'static
{
}

impl<T> Protocol for T where
    T: FrameFormat + FrameValidator + MessageCodec + Send + Sync + 'static
{
}
