use tracing::info;

use crate::cmd::protocol::{AnyProtocol, CliProtocol};
use crate::cmd::{parse_duration, LinkArgs, RequestArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let link = &args.link;
    match link.protocol.build(link.unit)? {
        AnyProtocol::Eiscp(protocol) => request_with(link, protocol, &args.message, timeout, format),
        AnyProtocol::Iscp(protocol) => request_with(link, protocol, &args.message, timeout, format),
        AnyProtocol::Modbus(protocol) => request_with(link, protocol, &args.message, timeout, format),
        AnyProtocol::Rotel(protocol) => request_with(link, protocol, &args.message, timeout, format),
    }
}

fn request_with<P: CliProtocol>(
    link: &LinkArgs,
    protocol: P,
    message: &str,
    timeout: Option<std::time::Duration>,
    format: OutputFormat,
) -> CliResult<i32> {
    let request = protocol.parse_message(message)?;
    let config = link.load_config()?;
    let timeout = timeout.unwrap_or(config.transaction_timeout);
    let channel = link.open(protocol, config)?;

    let reply = channel
        .request_with_timeout(&request, timeout)
        .map_err(|err| channel_error("request failed", err))?;
    let name = channel.protocol().name();
    print_message(name, &channel.protocol().view(&reply), format);

    channel.close();
    info!(protocol = name, "request completed");
    Ok(SUCCESS)
}
