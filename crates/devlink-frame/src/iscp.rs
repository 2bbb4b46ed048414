//! Integra Serial Control Protocol, over the network (eISCP) and over
//! RS-232 (ISCP).
//!
//! Network frame (header fields big-endian):
//! ```text
//! ┌────────┬─────────────┬─────────────┬─────────┬──────────┬─────┬──────────────┬────────────┐
//! │ "ISCP" │ header size │ data length │ version │ reserved │ "!" │ unit cmd val │ terminator │
//! │ 4B     │ 4B (= 16)   │ 4B (= L)    │ 1B (=1) │ 3B       │ 1B  │ L bytes      │ 1-4B       │
//! └────────┴─────────────┴─────────────┴─────────┴──────────┴─────┴──────────────┴────────────┘
//! ```
//! The serial form is the same message without the 16-byte header.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{FrameBounds, FrameFormat, FrameValidator, MessageCodec, Probe, RawFrame};
use crate::error::{DecodeError, EncodeError, FramingError, ValidationError};
use crate::terminator::{TerminatorMatch, TerminatorSet};

/// eISCP magic.
pub const MAGIC: [u8; 4] = *b"ISCP";
/// eISCP header size; the only value accepted on decode.
pub const HEADER_SIZE: u32 = 16;
/// eISCP protocol version.
pub const VERSION: u8 = 0x01;
/// Start-of-message character.
pub const START: u8 = b'!';
/// Unit type of a receiver.
pub const UNIT_RECEIVER: char = '1';
/// Value that asks the device to report a command's state.
pub const QUERY: &str = "QSTN";

const COMMAND_LEN: usize = 3;

/// One ISCP message: `{unit}{command}{value}`, e.g. `1PWR01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IscpMessage {
    pub unit: char,
    pub command: String,
    pub value: String,
}

impl IscpMessage {
    /// Message for the receiver unit.
    pub fn new(command: &str, value: &str) -> Self {
        Self::with_unit(UNIT_RECEIVER, command, value)
    }

    pub fn with_unit(unit: char, command: &str, value: &str) -> Self {
        Self {
            unit,
            command: command.to_string(),
            value: value.to_string(),
        }
    }

    /// State query for `command`, e.g. `PWRQSTN`.
    pub fn query(command: &str) -> Self {
        Self::new(command, QUERY)
    }

    pub fn is_query(&self) -> bool {
        self.value == QUERY
    }

    /// Parse the `{command}{value}` text form, e.g. `PWR01`, for the
    /// receiver unit.
    pub fn parse(text: &str) -> Result<Self, EncodeError> {
        if text.len() < COMMAND_LEN || !text.is_char_boundary(COMMAND_LEN) {
            return Err(EncodeError::InvalidField {
                field: "command",
                reason: format!("{text:?} is shorter than {COMMAND_LEN} characters"),
            });
        }
        let (command, value) = text.split_at(COMMAND_LEN);
        let message = Self::new(command, value);
        message.check()?;
        Ok(message)
    }

    fn body_len(&self) -> usize {
        self.unit.len_utf8() + self.command.len() + self.value.len()
    }

    fn check(&self) -> Result<(), EncodeError> {
        if !self.unit.is_ascii_graphic() {
            return Err(EncodeError::InvalidField {
                field: "unit",
                reason: format!("{:?} is not a printable ASCII character", self.unit),
            });
        }
        if self.command.len() != COMMAND_LEN
            || !self.command.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(EncodeError::InvalidField {
                field: "command",
                reason: format!("{:?} is not {COMMAND_LEN} ASCII letters or digits", self.command),
            });
        }
        if self.value.bytes().any(|b| matches!(b, 0x1A | 0x0D | 0x0A)) {
            return Err(EncodeError::InvalidField {
                field: "value",
                reason: "contains a terminator byte".to_string(),
            });
        }
        Ok(())
    }

    fn put_body(&self, dst: &mut BytesMut) {
        let mut unit = [0u8; 4];
        dst.put_u8(START);
        dst.put_slice(self.unit.encode_utf8(&mut unit).as_bytes());
        dst.put_slice(self.command.as_bytes());
        dst.put_slice(self.value.as_bytes());
    }
}

impl fmt::Display for IscpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.unit, self.command, self.value)
    }
}

/// Decode `{unit}{command}{value}` without the start marker.
fn decode_body(body: &[u8]) -> Result<IscpMessage, DecodeError> {
    if body.len() < 1 + COMMAND_LEN {
        return Err(DecodeError::TooShort {
            have: body.len(),
            need: 1 + COMMAND_LEN,
        });
    }
    let unit = body[0];
    if !unit.is_ascii_graphic() {
        return Err(DecodeError::InvalidField {
            field: "unit",
            reason: format!("byte 0x{unit:02X} is not printable ASCII"),
        });
    }
    let command = &body[1..1 + COMMAND_LEN];
    if !command.iter().all(u8::is_ascii_alphanumeric) {
        return Err(DecodeError::InvalidField {
            field: "command",
            reason: format!("{command:02X?} is not ASCII letters or digits"),
        });
    }
    let value =
        std::str::from_utf8(&body[1 + COMMAND_LEN..]).map_err(|e| DecodeError::InvalidField {
            field: "value",
            reason: e.to_string(),
        })?;

    Ok(IscpMessage {
        unit: char::from(unit),
        command: String::from_utf8_lossy(command).into_owned(),
        value: value.to_string(),
    })
}

/// Replies answer the request with the same command code.
fn same_command(request: &IscpMessage, reply: &IscpMessage) -> bool {
    request.command == reply.command
}

/// Settings of the network protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EiscpOptions {
    /// Terminators accepted after the message body.
    pub terminators: TerminatorSet,
    /// Terminator appended when encoding.
    pub write_terminator: Vec<u8>,
    /// Largest accepted frame, header and terminator included.
    pub max_frame_len: usize,
}

impl Default for EiscpOptions {
    fn default() -> Self {
        Self {
            terminators: TerminatorSet::iscp_default(),
            write_terminator: vec![0x0D],
            max_frame_len: 1024,
        }
    }
}

/// eISCP: magic-prefix, length-prefixed ISCP over TCP.
#[derive(Debug, Clone, Default)]
pub struct Eiscp {
    options: EiscpOptions,
}

impl Eiscp {
    pub fn new(options: EiscpOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EiscpOptions {
        &self.options
    }

    /// Offset of the message body (after the `!` start marker).
    const BODY_OFFSET: usize = HEADER_SIZE as usize + 1;
}

impl FrameFormat for Eiscp {
    fn name(&self) -> &'static str {
        "eiscp"
    }

    fn max_frame_len(&self) -> usize {
        self.options.max_frame_len
    }

    fn marker_len(&self) -> usize {
        MAGIC.len()
    }

    fn probe(&self, candidate: &[u8]) -> Result<Probe, FramingError> {
        let magic_len = candidate.len().min(MAGIC.len());
        if candidate[..magic_len] != MAGIC[..magic_len] {
            return Err(FramingError::NoMarker);
        }
        if candidate.len() < HEADER_SIZE as usize {
            return Ok(Probe::Need(HEADER_SIZE as usize));
        }

        let mut header = &candidate[MAGIC.len()..HEADER_SIZE as usize];
        let header_size = header.get_u32();
        if header_size != HEADER_SIZE {
            return Err(FramingError::HeaderMismatch {
                field: "header_size",
                expected: HEADER_SIZE,
                actual: header_size,
            });
        }
        let data_len = header.get_u32() as usize;
        let max_body = self
            .options
            .max_frame_len
            .saturating_sub(Self::BODY_OFFSET + self.options.terminators.max_len());
        if data_len == 0 || data_len > max_body {
            return Err(FramingError::AbsurdLength {
                declared: data_len,
                max: max_body,
            });
        }
        let version = header.get_u8();
        if version != VERSION {
            return Err(FramingError::HeaderMismatch {
                field: "version",
                expected: u32::from(VERSION),
                actual: u32::from(version),
            });
        }

        if candidate.len() <= HEADER_SIZE as usize {
            return Ok(Probe::Need(HEADER_SIZE as usize + 1));
        }
        if candidate[HEADER_SIZE as usize] != START {
            return Err(FramingError::MissingStartMarker);
        }

        let body_end = Self::BODY_OFFSET + data_len;
        if candidate.len() < body_end {
            return Ok(Probe::Need(body_end + 1));
        }
        let bounds = |trailer: usize| FrameBounds::new(body_end + trailer, Self::BODY_OFFSET, trailer);
        match self.options.terminators.probe(&candidate[body_end..]) {
            TerminatorMatch::NoMatch => Err(FramingError::Unterminated),
            TerminatorMatch::NeedMore => Ok(Probe::Need(candidate.len() + 1)),
            TerminatorMatch::Extendable(len) => Ok(Probe::Extend {
                need: candidate.len() + 1,
                fallback: bounds(len),
            }),
            TerminatorMatch::Complete(len) => Ok(Probe::Complete(bounds(len))),
        }
    }
}

impl FrameValidator for Eiscp {
    fn validate(&self, frame: &RawFrame) -> Result<(), ValidationError> {
        let header = frame.header();
        if header.len() != Self::BODY_OFFSET {
            return Err(ValidationError::Length {
                declared: Self::BODY_OFFSET,
                captured: header.len(),
            });
        }
        let declared = (&header[8..12]).get_u32() as usize;
        let captured = frame.payload().len();
        if declared != captured {
            return Err(ValidationError::Length { declared, captured });
        }
        if !self.options.terminators.contains(frame.trailer()) {
            return Err(ValidationError::Terminator);
        }
        Ok(())
    }
}

impl MessageCodec for Eiscp {
    type Message = IscpMessage;

    fn decode(&self, frame: &RawFrame) -> Result<IscpMessage, DecodeError> {
        decode_body(frame.payload())
    }

    fn encode(&self, message: &IscpMessage, dst: &mut BytesMut) -> Result<(), EncodeError> {
        message.check()?;
        let data_len = message.body_len();
        let size = Self::BODY_OFFSET + data_len + self.options.write_terminator.len();
        if size > self.options.max_frame_len {
            return Err(EncodeError::PayloadTooLarge {
                size,
                max: self.options.max_frame_len,
            });
        }

        dst.reserve(size);
        dst.put_slice(&MAGIC);
        dst.put_u32(HEADER_SIZE);
        dst.put_u32(data_len as u32);
        dst.put_u8(VERSION);
        dst.put_slice(&[0u8; 3]);
        message.put_body(dst);
        dst.put_slice(&self.options.write_terminator);
        Ok(())
    }

    fn correlates(&self, request: &IscpMessage, reply: &IscpMessage) -> bool {
        same_command(request, reply)
    }
}

/// Settings of the serial protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IscpOptions {
    pub terminators: TerminatorSet,
    pub write_terminator: Vec<u8>,
    pub max_frame_len: usize,
}

impl Default for IscpOptions {
    fn default() -> Self {
        Self {
            terminators: TerminatorSet::iscp_default(),
            write_terminator: vec![0x0D],
            max_frame_len: 128,
        }
    }
}

/// Serial ISCP: `!`-prefixed, terminator-framed.
#[derive(Debug, Clone, Default)]
pub struct Iscp {
    options: IscpOptions,
}

impl Iscp {
    pub fn new(options: IscpOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &IscpOptions {
        &self.options
    }
}

impl FrameFormat for Iscp {
    fn name(&self) -> &'static str {
        "iscp"
    }

    fn max_frame_len(&self) -> usize {
        self.options.max_frame_len
    }

    fn marker_len(&self) -> usize {
        1
    }

    fn probe(&self, candidate: &[u8]) -> Result<Probe, FramingError> {
        if candidate[0] != START {
            return Err(FramingError::NoMarker);
        }
        let terminators = &self.options.terminators;
        let Some(body_end) = candidate
            .iter()
            .skip(1)
            .position(|&b| b == START || terminators.starts_with_byte(b))
            .map(|p| p + 1)
        else {
            if candidate.len() >= self.options.max_frame_len {
                return Err(FramingError::Unterminated);
            }
            return Ok(Probe::Need(candidate.len() + 1));
        };
        if candidate[body_end] == START {
            return Err(FramingError::MarkerInFrame { offset: body_end });
        }

        let bounds = |trailer: usize| FrameBounds::new(body_end + trailer, 1, trailer);
        match terminators.probe(&candidate[body_end..]) {
            TerminatorMatch::NoMatch => Err(FramingError::Unterminated),
            TerminatorMatch::NeedMore => Ok(Probe::Need(candidate.len() + 1)),
            TerminatorMatch::Extendable(len) => Ok(Probe::Extend {
                need: candidate.len() + 1,
                fallback: bounds(len),
            }),
            TerminatorMatch::Complete(len) => Ok(Probe::Complete(bounds(len))),
        }
    }
}

impl FrameValidator for Iscp {
    fn validate(&self, frame: &RawFrame) -> Result<(), ValidationError> {
        if frame.header() != [START] {
            return Err(ValidationError::Length {
                declared: 1,
                captured: frame.header().len(),
            });
        }
        if !self.options.terminators.contains(frame.trailer()) {
            return Err(ValidationError::Terminator);
        }
        let body = frame.payload();
        if body.len() < 1 + COMMAND_LEN {
            return Err(ValidationError::Body("missing unit or command"));
        }
        if !body[0].is_ascii_graphic() {
            return Err(ValidationError::Body("unit is not printable ASCII"));
        }
        if !body[1..1 + COMMAND_LEN].iter().all(u8::is_ascii_alphanumeric) {
            return Err(ValidationError::Body("command is not ASCII letters or digits"));
        }
        Ok(())
    }
}

impl MessageCodec for Iscp {
    type Message = IscpMessage;

    fn decode(&self, frame: &RawFrame) -> Result<IscpMessage, DecodeError> {
        decode_body(frame.payload())
    }

    fn encode(&self, message: &IscpMessage, dst: &mut BytesMut) -> Result<(), EncodeError> {
        message.check()?;
        // Without a declared length a second `!` would start a new frame.
        if message.value.bytes().any(|b| b == START) {
            return Err(EncodeError::InvalidField {
                field: "value",
                reason: "serial frames cannot carry '!'".to_string(),
            });
        }
        let size = 1 + message.body_len() + self.options.write_terminator.len();
        if size > self.options.max_frame_len {
            return Err(EncodeError::PayloadTooLarge {
                size,
                max: self.options.max_frame_len,
            });
        }
        dst.reserve(size);
        message.put_body(dst);
        dst.put_slice(&self.options.write_terminator);
        Ok(())
    }

    fn correlates(&self, request: &IscpMessage, reply: &IscpMessage) -> bool {
        same_command(request, reply)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::decode::decode_bytes;

    const PWR01: &[u8] = b"ISCP\x00\x00\x00\x10\x00\x00\x00\x06\x01\x00\x00\x00!1PWR01\r";

    #[test]
    fn decodes_reference_frame() {
        let report = decode_bytes(&Eiscp::default(), PWR01);
        assert_eq!(report.messages, vec![IscpMessage::new("PWR", "01")]);
        assert_eq!(report.stats.discarded_bytes, 0);

        let message = &report.messages[0];
        assert_eq!(message.unit, '1');
        assert_eq!(message.to_string(), "1PWR01");
    }

    #[test]
    fn encodes_reference_frame() {
        let mut wire = BytesMut::new();
        Eiscp::default()
            .encode(&IscpMessage::new("PWR", "01"), &mut wire)
            .unwrap();
        assert_eq!(wire.as_ref(), PWR01);
    }

    #[test]
    fn accepts_every_default_terminator() {
        for terminator in TerminatorSet::iscp_default().patterns() {
            let mut wire = PWR01[..PWR01.len() - 1].to_vec();
            wire.extend_from_slice(terminator);
            let report = decode_bytes(&Eiscp::default(), &wire);
            assert_eq!(report.messages.len(), 1, "terminator {terminator:02X?}");
            assert_eq!(report.stats.discarded_bytes, 0);
        }
    }

    #[test]
    fn rejects_bad_header_constants() {
        let protocol = Eiscp::default();

        let mut header = PWR01.to_vec();
        header[7] = 0x11;
        assert_eq!(
            protocol.probe(&header),
            Err(FramingError::HeaderMismatch {
                field: "header_size",
                expected: 16,
                actual: 17
            })
        );

        let mut version = PWR01.to_vec();
        version[12] = 0x02;
        assert!(matches!(
            protocol.probe(&version),
            Err(FramingError::HeaderMismatch { field: "version", .. })
        ));

        let mut zero = PWR01.to_vec();
        zero[11] = 0x00;
        assert!(matches!(
            protocol.probe(&zero),
            Err(FramingError::AbsurdLength { declared: 0, .. })
        ));

        let mut huge = PWR01.to_vec();
        huge[8] = 0x7F;
        assert!(matches!(
            protocol.probe(&huge),
            Err(FramingError::AbsurdLength { .. })
        ));

        let mut no_start = PWR01.to_vec();
        no_start[16] = b'?';
        assert_eq!(
            protocol.probe(&no_start),
            Err(FramingError::MissingStartMarker)
        );
    }

    #[test]
    fn probe_asks_for_more_until_complete() {
        let protocol = Eiscp::default();
        assert_eq!(protocol.probe(b"IS"), Ok(Probe::Need(16)));
        assert_eq!(protocol.probe(&PWR01[..16]), Ok(Probe::Need(17)));
        assert_eq!(protocol.probe(&PWR01[..20]), Ok(Probe::Need(24)));
        assert_eq!(
            protocol.probe(PWR01),
            Ok(Probe::Extend {
                need: 25,
                fallback: FrameBounds::new(24, 17, 1)
            })
        );
        assert_eq!(protocol.probe(b"IX"), Err(FramingError::NoMarker));
    }

    #[test]
    fn terminator_inside_declared_body_is_length_checked() {
        // Declared 6, but the terminator sits after 5 body bytes.
        let wire = b"ISCP\x00\x00\x00\x10\x00\x00\x00\x06\x01\x00\x00\x00!1PWR0\r";
        let report = decode_bytes(&Eiscp::default(), wire);
        assert!(report.messages.is_empty());
    }

    #[test]
    fn command_echo_correlation() {
        let protocol = Eiscp::default();
        let request = IscpMessage::query("PWR");
        assert!(protocol.correlates(&request, &IscpMessage::new("PWR", "01")));
        assert!(!protocol.correlates(&request, &IscpMessage::new("MVL", "20")));
    }

    #[test]
    fn encode_rejects_unrepresentable_messages() {
        let protocol = Eiscp::default();
        let mut wire = BytesMut::new();

        let bad_command = IscpMessage::new("PW", "01");
        assert!(matches!(
            protocol.encode(&bad_command, &mut wire),
            Err(EncodeError::InvalidField { field: "command", .. })
        ));

        let bad_value = IscpMessage::new("NLS", "a\rb");
        assert!(matches!(
            protocol.encode(&bad_value, &mut wire),
            Err(EncodeError::InvalidField { field: "value", .. })
        ));

        let too_long = IscpMessage::new("NLS", &"x".repeat(2000));
        assert!(matches!(
            protocol.encode(&too_long, &mut wire),
            Err(EncodeError::PayloadTooLarge { .. })
        ));
        assert!(wire.is_empty());
    }

    #[test]
    fn serial_frame_roundtrip_and_rejects() {
        let protocol = Iscp::default();
        let mut wire = BytesMut::new();
        protocol
            .encode(&IscpMessage::query("MVL"), &mut wire)
            .unwrap();
        assert_eq!(wire.as_ref(), b"!1MVLQSTN\r");

        let report = decode_bytes(&protocol, b"!1MVL3A\x1a\r\n");
        assert_eq!(report.messages, vec![IscpMessage::new("MVL", "3A")]);

        // Unit plus a two-letter command is not a frame.
        let report = decode_bytes(&protocol, b"!1MV\r");
        assert!(report.messages.is_empty());
        assert_eq!(report.stats.validation_errors, 1);
        assert_eq!(report.stats.discarded_bytes, 5);
    }

    #[test]
    fn stray_start_marker_does_not_swallow_next_frame() {
        let protocol = Iscp::default();
        assert_eq!(
            protocol.probe(b"!x!"),
            Err(FramingError::MarkerInFrame { offset: 2 })
        );

        let report = decode_bytes(&protocol, b"!x!1PWR01\r");
        assert_eq!(report.messages, vec![IscpMessage::new("PWR", "01")]);
        assert_eq!(report.stats.discarded_bytes, 2);
        assert_eq!(report.stats.framing_errors, 1);

        // A well-formed prefix is still cut at the next marker.
        let report = decode_bytes(&protocol, b"!1ABCjunk!1MVL20\r");
        assert_eq!(report.messages, vec![IscpMessage::new("MVL", "20")]);
    }

    #[test]
    fn serial_encode_rejects_start_marker_in_value() {
        let mut wire = BytesMut::new();
        assert!(Iscp::default()
            .encode(&IscpMessage::new("NLT", "hi!"), &mut wire)
            .is_err());
        assert!(wire.is_empty());
        Eiscp::default()
            .encode(&IscpMessage::new("NLT", "hi!"), &mut wire)
            .unwrap();
    }

    #[test]
    fn serial_frame_without_terminator_is_rejected_at_limit() {
        let protocol = Iscp::new(IscpOptions {
            max_frame_len: 8,
            ..IscpOptions::default()
        });
        assert_eq!(
            protocol.probe(b"!1PWR010"),
            Err(FramingError::Unterminated)
        );
        assert_eq!(protocol.probe(b"!1PWR01"), Ok(Probe::Need(8)));
    }

    #[test]
    fn parse_text_form() {
        assert_eq!(
            IscpMessage::parse("PWRQSTN").unwrap(),
            IscpMessage::query("PWR")
        );
        assert!(IscpMessage::parse("PW").is_err());
    }

    #[test]
    fn options_from_json() {
        let options: EiscpOptions =
            serde_json::from_str(r#"{"terminators":[[26]],"write_terminator":[26,13,10]}"#).unwrap();
        assert_eq!(options.max_frame_len, 1024);
        assert_eq!(options.write_terminator, vec![0x1A, 0x0D, 0x0A]);
        assert!(options.terminators.contains(&[0x1A]));
    }

    fn message_with_value(value: &'static str) -> impl Strategy<Value = IscpMessage> {
        ("[1-9A-Z]", "[A-Z0-9]{3}", value).prop_map(|(unit, command, value)| {
            IscpMessage::with_unit(unit.chars().next().unwrap_or('1'), &command, &value)
        })
    }

    fn message() -> impl Strategy<Value = IscpMessage> {
        message_with_value("[ -~]{0,40}")
    }

    /// Printable values without `!`.
    fn serial_message() -> impl Strategy<Value = IscpMessage> {
        message_with_value("[ \"-~]{0,40}")
    }

    proptest! {
        #[test]
        fn eiscp_roundtrip(message in message()) {
            let protocol = Eiscp::default();
            let mut wire = BytesMut::new();
            protocol.encode(&message, &mut wire).unwrap();
            let report = decode_bytes(&protocol, &wire);
            prop_assert_eq!(report.messages, vec![message]);
        }

        #[test]
        fn serial_roundtrip(message in serial_message()) {
            let protocol = Iscp::default();
            let mut wire = BytesMut::new();
            protocol.encode(&message, &mut wire).unwrap();
            let report = decode_bytes(&protocol, &wire);
            prop_assert_eq!(report.messages, vec![message]);
        }
    }
}
