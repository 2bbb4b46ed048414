use clap::ValueEnum;
use devlink_frame::serde_hex::{decode_hex, encode_hex};
use devlink_frame::{
    Eiscp, Iscp, IscpMessage, ModbusMessage, ModbusRole, ModbusRtu, Protocol, RotelHex,
    RotelMessage,
};
use serde::Serialize;

use crate::exit::{CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::MessageView;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProtocolArg {
    /// Network ISCP over TCP (port 60128).
    Eiscp,
    /// Serial ISCP, terminator-framed.
    Iscp,
    /// Modbus RTU, decoding slave responses.
    ModbusMaster,
    /// Modbus RTU, decoding master requests.
    ModbusSlave,
    /// Rotel HEX with escaped checksum.
    Rotel,
}

/// A built protocol, one variant per concrete type.
pub enum AnyProtocol {
    Eiscp(Eiscp),
    Iscp(Iscp),
    Modbus(ModbusRtu),
    Rotel(RotelHex),
}

impl ProtocolArg {
    /// `unit` narrows Modbus decoding to one slave address.
    pub fn build(self, unit: Option<u8>) -> CliResult<AnyProtocol> {
        let modbus = |role| {
            let protocol = ModbusRtu::new(role);
            match unit {
                Some(unit) => protocol.with_unit_filter(unit),
                None => protocol,
            }
        };
        if unit.is_some() && !matches!(self, Self::ModbusMaster | Self::ModbusSlave) {
            return Err(CliError::new(USAGE, "--unit only applies to Modbus protocols"));
        }
        Ok(match self {
            Self::Eiscp => AnyProtocol::Eiscp(Eiscp::default()),
            Self::Iscp => AnyProtocol::Iscp(Iscp::default()),
            Self::ModbusMaster => AnyProtocol::Modbus(modbus(ModbusRole::Master)),
            Self::ModbusSlave => AnyProtocol::Modbus(modbus(ModbusRole::Slave)),
            Self::Rotel => AnyProtocol::Rotel(RotelHex),
        })
    }
}

/// What the commands need from a protocol beyond framing and codecs.
pub trait CliProtocol: Protocol {
    /// Parse the `--message` argument.
    fn parse_message(&self, text: &str) -> CliResult<Self::Message>;

    fn view(&self, message: &Self::Message) -> MessageView;
}

fn json_of<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn parse_iscp(text: &str) -> CliResult<IscpMessage> {
    IscpMessage::parse(text.trim())
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid ISCP message: {err}")))
}

fn iscp_view(message: &IscpMessage) -> MessageView {
    MessageView {
        summary: message.to_string(),
        json: json_of(message),
    }
}

impl CliProtocol for Eiscp {
    fn parse_message(&self, text: &str) -> CliResult<IscpMessage> {
        parse_iscp(text)
    }

    fn view(&self, message: &IscpMessage) -> MessageView {
        iscp_view(message)
    }
}

impl CliProtocol for Iscp {
    fn parse_message(&self, text: &str) -> CliResult<IscpMessage> {
        parse_iscp(text)
    }

    fn view(&self, message: &IscpMessage) -> MessageView {
        iscp_view(message)
    }
}

/// Hex bytes `address function payload..`, CRC excluded.
impl CliProtocol for ModbusRtu {
    fn parse_message(&self, text: &str) -> CliResult<ModbusMessage> {
        let bytes = hex_arg(text)?;
        match bytes.as_slice() {
            [address, function, payload @ ..] => {
                Ok(ModbusMessage::new(*address, *function, payload.to_vec()))
            }
            _ => Err(CliError::new(
                DATA_INVALID,
                "Modbus message needs at least an address and a function code",
            )),
        }
    }

    fn view(&self, message: &ModbusMessage) -> MessageView {
        let mut summary = format!(
            "unit={} function=0x{:02X} payload={}",
            message.address,
            message.function,
            encode_hex(&message.payload)
        );
        if let Some(code) = message.exception_code() {
            summary.push_str(&format!(" exception=0x{code:02X}"));
        } else if let Some(registers) = message.registers() {
            summary.push_str(&format!(" registers={registers:?}"));
        }
        MessageView {
            summary,
            json: json_of(message),
        }
    }
}

/// Hex bytes `device_id kind data..`, checksum excluded.
impl CliProtocol for RotelHex {
    fn parse_message(&self, text: &str) -> CliResult<RotelMessage> {
        let bytes = hex_arg(text)?;
        match bytes.as_slice() {
            [device_id, kind, data @ ..] => Ok(RotelMessage::new(*device_id, *kind, data.to_vec())),
            _ => Err(CliError::new(
                DATA_INVALID,
                "Rotel message needs at least a device id and a message type",
            )),
        }
    }

    fn view(&self, message: &RotelMessage) -> MessageView {
        MessageView {
            summary: format!(
                "device=0x{:02X} type=0x{:02X} data={}",
                message.device_id,
                message.kind,
                encode_hex(&message.data)
            ),
            json: json_of(message),
        }
    }
}

pub fn hex_arg(text: &str) -> CliResult<Vec<u8>> {
    decode_hex(text).map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))
}
