//! Frame synchronization, validation and message codecs for device links.
//!
//! A raw, possibly noisy byte stream becomes a sequence of typed messages in
//! four steps:
//! - [`StreamBuffer`] holds bytes pushed by a reader thread, with mark/reset
//!   for speculative consumption
//! - [`FrameScanner`] locates candidate frames using a protocol's
//!   [`FrameFormat`] and resynchronizes one byte at a time past garbage
//! - [`FrameValidator`] checks lengths and the CRC/checksum/terminator
//! - [`MessageCodec`] turns validated frames into messages and back
//!
//! Built-in protocols: network eISCP and serial ISCP ([`iscp`]), Modbus RTU
//! ([`modbus`]), and Rotel HEX ([`rotel`]). [`decode_bytes`] runs the whole
//! pipeline over an in-memory capture.

pub mod buffer;
pub mod checksum;
pub mod codec;
pub mod decode;
pub mod error;
pub mod iscp;
pub mod modbus;
pub mod rotel;
pub mod scanner;
pub mod serde_hex;
pub mod serde_ms;
pub mod source;
pub mod terminator;

pub use buffer::{OverflowPolicy, StreamBuffer, DEFAULT_BUFFER_CAPACITY};
pub use codec::{
    FrameBounds, FrameFormat, FrameValidator, MessageCodec, Probe, Protocol, RawFrame,
};
pub use decode::{decode_bytes, DecodeReport, Decoder};
pub use error::{
    BufferError, DecodeError, EncodeError, FrameError, FramingError, Result, StreamError,
    ValidationError,
};
pub use iscp::{Eiscp, EiscpOptions, Iscp, IscpMessage, IscpOptions};
pub use modbus::{ModbusMessage, ModbusRole, ModbusRtu};
pub use rotel::{RotelHex, RotelMessage};
pub use scanner::{DecodeStats, FrameScanner, ScanConfig};
pub use source::{ByteSource, SliceSource};
pub use terminator::{TerminatorMatch, TerminatorSet};
