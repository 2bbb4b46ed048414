use std::fs;

use devlink_frame::decode_bytes;
use tracing::info;

use crate::cmd::protocol::{hex_arg, AnyProtocol, CliProtocol};
use crate::cmd::DecodeArgs;
use crate::exit::{io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_decode_report, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let capture = read_capture(&args)?;
    match args.protocol.build(args.unit)? {
        AnyProtocol::Eiscp(protocol) => decode_with(&protocol, &capture, format),
        AnyProtocol::Iscp(protocol) => decode_with(&protocol, &capture, format),
        AnyProtocol::Modbus(protocol) => decode_with(&protocol, &capture, format),
        AnyProtocol::Rotel(protocol) => decode_with(&protocol, &capture, format),
    }
}

fn read_capture(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return hex_arg(hex);
    }
    match &args.file {
        Some(path) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err)),
        None => Ok(Vec::new()),
    }
}

/// Exits with `DATA_INVALID` when a non-empty capture yields no message.
fn decode_with<P: CliProtocol>(protocol: &P, capture: &[u8], format: OutputFormat) -> CliResult<i32> {
    let report = decode_bytes(protocol, capture);
    info!(
        protocol = protocol.name(),
        bytes = capture.len(),
        messages = report.messages.len(),
        discarded = report.stats.discarded_bytes,
        "capture decoded"
    );

    let views: Vec<_> = report.messages.iter().map(|m| protocol.view(m)).collect();
    print_decode_report(protocol.name(), &views, &report.stats, format);

    if views.is_empty() && !capture.is_empty() {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}
