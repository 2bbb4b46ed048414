//! Modbus RTU: `address function payload crc16`, CRC low byte first.
//!
//! RTU has no length field; the payload size follows from the function
//! code and from which side of the link is decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::checksum::crc16_modbus;
use crate::codec::{FrameBounds, FrameFormat, FrameValidator, MessageCodec, Probe, RawFrame};
use crate::error::{DecodeError, EncodeError, FramingError, ValidationError};

/// Largest RTU frame (address + PDU + CRC).
pub const MAX_FRAME_LEN: usize = 256;
/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

const HEADER_LEN: usize = 2;
const CRC_LEN: usize = 2;
const MAX_PAYLOAD: usize = MAX_FRAME_LEN - HEADER_LEN - CRC_LEN;

pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const READ_EXCEPTION_STATUS: u8 = 0x07;
    pub const DIAGNOSTICS: u8 = 0x08;
    pub const GET_COMM_EVENT_COUNTER: u8 = 0x0B;
    pub const GET_COMM_EVENT_LOG: u8 = 0x0C;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const REPORT_SERVER_ID: u8 = 0x11;
    pub const MASK_WRITE_REGISTER: u8 = 0x16;
    pub const READ_WRITE_REGISTERS: u8 = 0x17;
    pub const READ_FIFO_QUEUE: u8 = 0x18;
}

/// Which side of the link is decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusRole {
    /// Client: decodes responses.
    Master,
    /// Server: decodes requests.
    Slave,
}

/// How the payload length of a function is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Fixed(usize),
    /// `prefix` fixed bytes, then a one-byte count, then `count` bytes.
    Counted { prefix: usize },
    /// Two-byte big-endian count, then `count` bytes.
    Counted16,
}

fn shape(role: ModbusRole, code: u8) -> Option<Shape> {
    use self::function::*;

    match role {
        ModbusRole::Master => {
            if code & EXCEPTION_FLAG != 0 {
                return Some(Shape::Fixed(1));
            }
            match code {
                READ_COILS
                | READ_DISCRETE_INPUTS
                | READ_HOLDING_REGISTERS
                | READ_INPUT_REGISTERS
                | GET_COMM_EVENT_LOG
                | REPORT_SERVER_ID
                | READ_WRITE_REGISTERS => Some(Shape::Counted { prefix: 0 }),
                WRITE_SINGLE_COIL
                | WRITE_SINGLE_REGISTER
                | DIAGNOSTICS
                | GET_COMM_EVENT_COUNTER
                | WRITE_MULTIPLE_COILS
                | WRITE_MULTIPLE_REGISTERS => Some(Shape::Fixed(4)),
                READ_EXCEPTION_STATUS => Some(Shape::Fixed(1)),
                MASK_WRITE_REGISTER => Some(Shape::Fixed(6)),
                READ_FIFO_QUEUE => Some(Shape::Counted16),
                _ => None,
            }
        }
        ModbusRole::Slave => match code {
            READ_COILS
            | READ_DISCRETE_INPUTS
            | READ_HOLDING_REGISTERS
            | READ_INPUT_REGISTERS
            | WRITE_SINGLE_COIL
            | WRITE_SINGLE_REGISTER
            | DIAGNOSTICS => Some(Shape::Fixed(4)),
            READ_EXCEPTION_STATUS | GET_COMM_EVENT_COUNTER | GET_COMM_EVENT_LOG
            | REPORT_SERVER_ID => Some(Shape::Fixed(0)),
            WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => Some(Shape::Counted { prefix: 4 }),
            MASK_WRITE_REGISTER => Some(Shape::Fixed(6)),
            READ_WRITE_REGISTERS => Some(Shape::Counted { prefix: 8 }),
            READ_FIFO_QUEUE => Some(Shape::Fixed(2)),
            _ => None,
        },
    }
}

/// One Modbus PDU with its unit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusMessage {
    pub address: u8,
    pub function: u8,
    #[serde(with = "crate::serde_hex")]
    pub payload: Bytes,
}

impl ModbusMessage {
    pub fn new(address: u8, function: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            function,
            payload: payload.into(),
        }
    }

    /// Read holding registers request (function 0x03).
    pub fn read_holding_registers(address: u8, start: u16, count: u16) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16(start);
        payload.put_u16(count);
        Self::new(address, function::READ_HOLDING_REGISTERS, payload.freeze())
    }

    /// Read input registers request (function 0x04).
    pub fn read_input_registers(address: u8, start: u16, count: u16) -> Self {
        let mut message = Self::read_holding_registers(address, start, count);
        message.function = function::READ_INPUT_REGISTERS;
        message
    }

    /// Write single register (function 0x06); the response echoes it.
    pub fn write_single_register(address: u8, register: u16, value: u16) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16(register);
        payload.put_u16(value);
        Self::new(address, function::WRITE_SINGLE_REGISTER, payload.freeze())
    }

    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// Register values of a read holding/input registers response.
    pub fn registers(&self) -> Option<Vec<u16>> {
        if !matches!(
            self.function,
            function::READ_HOLDING_REGISTERS | function::READ_INPUT_REGISTERS
        ) {
            return None;
        }
        let (&count, mut data) = self.payload.split_first()?;
        if usize::from(count) != data.len() || data.len() % 2 != 0 {
            return None;
        }
        let mut registers = Vec::with_capacity(data.len() / 2);
        while data.has_remaining() {
            registers.push(data.get_u16());
        }
        Some(registers)
    }
}

/// Modbus RTU framing for one role, optionally narrowed to one unit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusRtu {
    pub role: ModbusRole,
    #[serde(default)]
    pub unit_filter: Option<u8>,
}

impl ModbusRtu {
    pub fn new(role: ModbusRole) -> Self {
        Self {
            role,
            unit_filter: None,
        }
    }

    /// Only sync on frames addressed to/from `unit`.
    pub fn with_unit_filter(mut self, unit: u8) -> Self {
        self.unit_filter = Some(unit);
        self
    }
}

impl FrameFormat for ModbusRtu {
    fn name(&self) -> &'static str {
        match self.role {
            ModbusRole::Master => "modbus-master",
            ModbusRole::Slave => "modbus-slave",
        }
    }

    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }

    fn marker_len(&self) -> usize {
        1
    }

    fn probe(&self, candidate: &[u8]) -> Result<Probe, FramingError> {
        if let Some(unit) = self.unit_filter {
            if candidate[0] != unit {
                return Err(FramingError::NoMarker);
            }
        }
        let Some(&function) = candidate.get(1) else {
            return Ok(Probe::Need(HEADER_LEN));
        };

        let payload_len = match shape(self.role, function) {
            None => return Err(FramingError::UnknownFunction(function)),
            Some(Shape::Fixed(len)) => len,
            Some(Shape::Counted { prefix }) => {
                let Some(&count) = candidate.get(HEADER_LEN + prefix) else {
                    return Ok(Probe::Need(HEADER_LEN + prefix + 1));
                };
                if count == 0 {
                    return Err(FramingError::AbsurdLength {
                        declared: 0,
                        max: MAX_PAYLOAD,
                    });
                }
                prefix + 1 + usize::from(count)
            }
            Some(Shape::Counted16) => {
                if candidate.len() < HEADER_LEN + 2 {
                    return Ok(Probe::Need(HEADER_LEN + 2));
                }
                let count = usize::from((&candidate[HEADER_LEN..HEADER_LEN + 2]).get_u16());
                if count == 0 {
                    return Err(FramingError::AbsurdLength {
                        declared: 0,
                        max: MAX_PAYLOAD,
                    });
                }
                2 + count
            }
        };

        if payload_len > MAX_PAYLOAD {
            return Err(FramingError::AbsurdLength {
                declared: payload_len,
                max: MAX_PAYLOAD,
            });
        }
        let total = HEADER_LEN + payload_len + CRC_LEN;
        if candidate.len() < total {
            return Ok(Probe::Need(total));
        }
        Ok(Probe::Complete(FrameBounds::new(total, HEADER_LEN, CRC_LEN)))
    }
}

impl FrameValidator for ModbusRtu {
    fn validate(&self, frame: &RawFrame) -> Result<(), ValidationError> {
        if frame.len() < HEADER_LEN + CRC_LEN || frame.trailer().len() != CRC_LEN {
            return Err(ValidationError::Length {
                declared: HEADER_LEN + CRC_LEN,
                captured: frame.len(),
            });
        }
        let computed = crc16_modbus(frame.without_trailer());
        let received = (&frame.trailer()[..]).get_u16_le();
        if computed != received {
            return Err(ValidationError::Checksum { computed, received });
        }
        Ok(())
    }
}

impl MessageCodec for ModbusRtu {
    type Message = ModbusMessage;

    fn decode(&self, frame: &RawFrame) -> Result<ModbusMessage, DecodeError> {
        let header = frame.header();
        if header.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                have: header.len(),
                need: HEADER_LEN,
            });
        }
        Ok(ModbusMessage {
            address: header[0],
            function: header[1],
            payload: frame.bytes().slice(HEADER_LEN..frame.len() - CRC_LEN),
        })
    }

    fn encode(&self, message: &ModbusMessage, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if message.payload.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge {
                size: message.payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        let start = dst.len();
        dst.reserve(HEADER_LEN + message.payload.len() + CRC_LEN);
        dst.put_u8(message.address);
        dst.put_u8(message.function);
        dst.put_slice(&message.payload);
        let crc = crc16_modbus(&dst[start..]);
        dst.put_u16_le(crc);
        Ok(())
    }

    fn correlates(&self, request: &ModbusMessage, reply: &ModbusMessage) -> bool {
        request.address == reply.address
            && (reply.function == request.function
                || reply.function == request.function | EXCEPTION_FLAG)
    }
}
