use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use devlink_channel::{Channel, ChannelConfig};
#[cfg(unix)]
use devlink_transport::SerialSettings;
use tracing::debug;

use crate::exit::{channel_error, io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod monitor;
pub mod protocol;
pub mod request;
pub mod version;

use protocol::{CliProtocol, ProtocolArg};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a captured byte stream and print messages and statistics.
    Decode(DecodeArgs),
    /// Open a link and print every unsolicited message.
    Monitor(MonitorArgs),
    /// Send one request and print the correlated reply.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Protocol to decode.
    #[arg(long, short = 'p')]
    pub protocol: ProtocolArg,
    /// Only accept Modbus frames for this unit address.
    #[arg(long)]
    pub unit: Option<u8>,
    /// Captured bytes as hex (whitespace, ':' and '-' are ignored).
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read captured bytes from a file.
    #[arg(long, conflicts_with = "hex")]
    pub file: Option<PathBuf>,
}

/// Where the device is reached and how the channel is tuned.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Protocol spoken on the link.
    #[arg(long, short = 'p')]
    pub protocol: ProtocolArg,
    /// Only accept Modbus frames for this unit address.
    #[arg(long)]
    pub unit: Option<u8>,
    /// Device address as host:port.
    #[arg(long, conflicts_with = "serial", required_unless_present = "serial")]
    pub tcp: Option<String>,
    /// Serial device path.
    #[arg(long, conflicts_with = "tcp")]
    pub serial: Option<String>,
    /// Serial baud rate.
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    /// Channel config as JSON.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Message to send: ISCP text (e.g. PWRQSTN) or hex bytes for Modbus
    /// and Rotel.
    #[arg(long, short = 'm')]
    pub message: String,
    /// Reply deadline (e.g. 2s, 500ms). Defaults to the config's
    /// transaction timeout.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

impl LinkArgs {
    pub fn load_config(&self) -> CliResult<ChannelConfig> {
        let Some(path) = &self.config else {
            return Ok(ChannelConfig::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        let config = ChannelConfig::from_json(&text)
            .map_err(|err| channel_error(&format!("invalid config {}", path.display()), err))?;
        debug!(path = %path.display(), ?config, "loaded channel config");
        Ok(config)
    }

    /// Connect to the device and start a channel speaking `protocol`.
    pub fn open<P: CliProtocol>(&self, protocol: P, config: ChannelConfig) -> CliResult<Channel<P>> {
        if let Some(addr) = &self.tcp {
            return devlink_channel::connect_tcp(addr, protocol, config)
                .map_err(|err| channel_error(&format!("connect to {addr} failed"), err));
        }
        if let Some(path) = &self.serial {
            return open_serial(path, self.baud, protocol, config);
        }
        Err(CliError::new(USAGE, "one of --tcp or --serial is required"))
    }
}

#[cfg(unix)]
fn open_serial<P: CliProtocol>(
    path: &str,
    baud: u32,
    protocol: P,
    config: ChannelConfig,
) -> CliResult<Channel<P>> {
    let settings = SerialSettings::with_baud(baud);
    devlink_channel::open_serial(path, &settings, protocol, config)
        .map_err(|err| channel_error(&format!("open {path} failed"), err))
}

#[cfg(not(unix))]
fn open_serial<P: CliProtocol>(
    _path: &str,
    _baud: u32,
    _protocol: P,
    _config: ChannelConfig,
) -> CliResult<Channel<P>> {
    Err(CliError::new(USAGE, "serial links are only supported on unix"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
