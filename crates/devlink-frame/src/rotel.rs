//! Rotel HEX protocol: `FE count id type data… checksum`.
//!
//! `count` covers `id` through the last data byte. The checksum is the low
//! byte of the sum from `count` through the last data byte; the values
//! `FD` and `FE` are sent escaped as `FD 00` and `FD 01`.
//!
//! `FE` never appears unescaped after the start byte, so a second `FE`
//! always begins a new frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::checksum::additive_sum8;
use crate::codec::{FrameBounds, FrameFormat, FrameValidator, MessageCodec, Probe, RawFrame};
use crate::error::{DecodeError, EncodeError, FramingError, ValidationError};

pub const START: u8 = 0xFE;
pub const ESCAPE: u8 = 0xFD;

const HEADER_LEN: usize = 2;
/// `id` and `type`.
const MIN_COUNT: usize = 2;
const MAX_COUNT: usize = u8::MAX as usize;
/// Start, count, the counted bytes and an escaped checksum.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_COUNT + 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotelMessage {
    pub device_id: u8,
    pub kind: u8,
    #[serde(with = "crate::serde_hex")]
    pub data: Bytes,
}

impl RotelMessage {
    pub fn new(device_id: u8, kind: u8, data: impl Into<Bytes>) -> Self {
        Self {
            device_id,
            kind,
            data: data.into(),
        }
    }
}

/// Rotel HEX framing.
///
/// There is no inter-byte timing check: a corrupt `count` on a live link
/// holds the candidate open until the next `FE` arrives or
/// [`ScanConfig::frame_timeout`](crate::ScanConfig) expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotelHex;

fn escape_checksum(checksum: u8, dst: &mut BytesMut) {
    match checksum {
        ESCAPE => dst.put_slice(&[ESCAPE, 0x00]),
        START => dst.put_slice(&[ESCAPE, 0x01]),
        other => dst.put_u8(other),
    }
}

fn unescape_checksum(trailer: &[u8]) -> Option<u8> {
    match trailer {
        [ESCAPE, 0x00] => Some(ESCAPE),
        [ESCAPE, 0x01] => Some(START),
        [ESCAPE] | [ESCAPE, _] => None,
        [value] => Some(*value),
        _ => None,
    }
}

impl FrameFormat for RotelHex {
    fn name(&self) -> &'static str {
        "rotel"
    }

    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }

    fn marker_len(&self) -> usize {
        1
    }

    fn probe(&self, candidate: &[u8]) -> Result<Probe, FramingError> {
        if candidate[0] != START {
            return Err(FramingError::NoMarker);
        }
        if let Some(pos) = candidate[1..].iter().position(|&b| b == START) {
            return Err(FramingError::MarkerInFrame { offset: pos + 1 });
        }
        let Some(&count) = candidate.get(1) else {
            return Ok(Probe::Need(HEADER_LEN));
        };
        let count = usize::from(count);
        if count < MIN_COUNT {
            return Err(FramingError::AbsurdLength {
                declared: count,
                max: MAX_COUNT,
            });
        }

        let checksum_at = HEADER_LEN + count;
        // Byte by byte, so a new start byte cuts a corrupt count short.
        if candidate.len() <= checksum_at {
            return Ok(Probe::Need(candidate.len() + 1));
        }
        if candidate[checksum_at] != ESCAPE {
            return Ok(Probe::Complete(FrameBounds::new(checksum_at + 1, HEADER_LEN, 1)));
        }
        if candidate.len() < checksum_at + 2 {
            return Ok(Probe::Need(checksum_at + 2));
        }
        Ok(Probe::Complete(FrameBounds::new(checksum_at + 2, HEADER_LEN, 2)))
    }
}

impl FrameValidator for RotelHex {
    fn validate(&self, frame: &RawFrame) -> Result<(), ValidationError> {
        let header = frame.header();
        let declared = header.get(1).map_or(0, |&c| usize::from(c));
        let captured = frame.payload().len();
        if header.len() != HEADER_LEN || declared != captured {
            return Err(ValidationError::Length { declared, captured });
        }

        let computed = additive_sum8(&frame.without_trailer()[1..]);
        let received = unescape_checksum(frame.trailer()).ok_or(ValidationError::Checksum {
            computed: u16::from(computed),
            received: u16::from(ESCAPE),
        })?;
        if computed != received {
            return Err(ValidationError::Checksum {
                computed: u16::from(computed),
                received: u16::from(received),
            });
        }
        Ok(())
    }
}

impl MessageCodec for RotelHex {
    type Message = RotelMessage;

    fn decode(&self, frame: &RawFrame) -> Result<RotelMessage, DecodeError> {
        let payload = frame.payload();
        if payload.len() < MIN_COUNT {
            return Err(DecodeError::TooShort {
                have: payload.len(),
                need: MIN_COUNT,
            });
        }
        let start = HEADER_LEN + MIN_COUNT;
        Ok(RotelMessage {
            device_id: payload[0],
            kind: payload[1],
            data: frame.bytes().slice(start..start + payload.len() - MIN_COUNT),
        })
    }

    fn encode(&self, message: &RotelMessage, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let count = MIN_COUNT + message.data.len();
        if count > MAX_COUNT {
            return Err(EncodeError::PayloadTooLarge {
                size: message.data.len(),
                max: MAX_COUNT - MIN_COUNT,
            });
        }
        if count == usize::from(START)
            || [message.device_id, message.kind].contains(&START)
            || message.data.contains(&START)
        {
            return Err(EncodeError::InvalidField {
                field: "data",
                reason: "0xFE is reserved for the start byte".to_string(),
            });
        }
        let start = dst.len();
        dst.reserve(HEADER_LEN + count + 2);
        dst.put_u8(START);
        dst.put_u8(count as u8);
        dst.put_u8(message.device_id);
        dst.put_u8(message.kind);
        dst.put_slice(&message.data);
        let checksum = additive_sum8(&dst[start + 1..]);
        escape_checksum(checksum, dst);
        Ok(())
    }
}
