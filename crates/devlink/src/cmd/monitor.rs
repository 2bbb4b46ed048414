use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use devlink_channel::{Listener, StreamError};
use tracing::{info, warn};

use crate::cmd::protocol::{AnyProtocol, CliProtocol};
use crate::cmd::{LinkArgs, MonitorArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

enum Event<M> {
    Message(M),
    Disconnected(StreamError),
}

/// Hands channel callbacks over to the printing loop.
struct Forwarder<M> {
    events: Sender<Event<M>>,
}

impl<M: Clone + Send> Listener<M> for Forwarder<M> {
    fn on_message(&self, message: &M) {
        let _ = self.events.send(Event::Message(message.clone()));
    }

    fn on_disconnect(&self, reason: &StreamError) {
        let _ = self.events.send(Event::Disconnected(reason.clone()));
    }
}

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let link = &args.link;
    match link.protocol.build(link.unit)? {
        AnyProtocol::Eiscp(protocol) => monitor_with(link, protocol, args.count, &running, format),
        AnyProtocol::Iscp(protocol) => monitor_with(link, protocol, args.count, &running, format),
        AnyProtocol::Modbus(protocol) => monitor_with(link, protocol, args.count, &running, format),
        AnyProtocol::Rotel(protocol) => monitor_with(link, protocol, args.count, &running, format),
    }
}

fn monitor_with<P: CliProtocol>(
    link: &LinkArgs,
    protocol: P,
    count: Option<usize>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<i32> {
    let config = link.load_config()?;
    let channel = link.open(protocol, config)?;
    let (tx, rx) = mpsc::channel();
    channel.register(Arc::new(Forwarder { events: tx }));

    let name = channel.protocol().name();
    let mut printed = 0usize;
    let code = loop {
        if !running.load(Ordering::SeqCst) {
            break SUCCESS;
        }
        match rx.recv_timeout(POLL) {
            Ok(Event::Message(message)) => {
                print_message(name, &channel.protocol().view(&message), format);
                printed = printed.saturating_add(1);
                if count.is_some_and(|count| printed >= count) {
                    break SUCCESS;
                }
            }
            Ok(Event::Disconnected(err @ StreamError::Io { .. })) => {
                warn!(protocol = name, error = %err, "link failed");
                break TRANSPORT_ERROR;
            }
            Ok(Event::Disconnected(reason)) => {
                info!(protocol = name, %reason, "link ended");
                break SUCCESS;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break SUCCESS,
        }
    };

    channel.close();
    let stats = channel.stats();
    info!(
        protocol = name,
        printed,
        discarded = stats.discarded_bytes,
        validation_errors = stats.validation_errors,
        "monitor stopped"
    );
    Ok(code)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
