use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use devlink_frame::{DecodeStats, Decoder, FrameError, Protocol, StreamBuffer, StreamError};
use devlink_transport::StreamSource;
use tracing::{debug, error, info, trace, warn};

use crate::config::ChannelConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{ChannelError, Result};
use crate::listener::{Listener, ListenerId};
use crate::transaction::TransactionCoordinator;

enum Event<M> {
    Message(M),
    Disconnected(StreamError),
}

struct Shared<P: Protocol> {
    protocol: Arc<P>,
    buffer: StreamBuffer,
    transactions: TransactionCoordinator<P::Message>,
    dispatcher: EventDispatcher<P::Message>,
    stop: AtomicBool,
    disconnect: Mutex<Option<StreamError>>,
    stats: Mutex<DecodeStats>,
}

impl<P: Protocol> Shared<P> {
    /// Keep the first reason; later ones are consequences of it.
    fn record_disconnect(&self, reason: StreamError) {
        let mut slot = self.disconnect.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn disconnect_reason(&self) -> StreamError {
        self.disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(StreamError::Closed)
    }
}

struct Workers {
    reader: JoinHandle<()>,
    decoder: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// A framed, request/response capable link to one device.
///
/// Dropping the channel closes it.
pub struct Channel<P: Protocol> {
    shared: Arc<Shared<P>>,
    writer: Mutex<Box<dyn StreamSource>>,
    control: Mutex<Box<dyn StreamSource>>,
    workers: Mutex<Option<Workers>>,
    config: ChannelConfig,
    description: String,
}

impl<P: Protocol> Channel<P> {
    /// Start the reader, decode and dispatch workers over `source`.
    ///
    /// The source's read timeout is set to `config.poll_interval` and its
    /// write timeout to `config.transaction_timeout`.
    pub fn open<S: StreamSource>(source: S, protocol: P, config: ChannelConfig) -> Result<Self> {
        config.validate(protocol.max_frame_len())?;
        source.set_read_timeout(Some(config.poll_interval))?;
        source.set_write_timeout(Some(config.transaction_timeout))?;

        let reader: Box<dyn StreamSource> = Box::new(source.try_clone_source()?);
        let control: Box<dyn StreamSource> = Box::new(source.try_clone_source()?);
        let description = source.describe();

        let shared = Arc::new(Shared {
            protocol: Arc::new(protocol),
            buffer: StreamBuffer::with_policy(config.buffer_capacity, config.overflow),
            transactions: TransactionCoordinator::new(),
            dispatcher: EventDispatcher::new(),
            stop: AtomicBool::new(false),
            disconnect: Mutex::new(None),
            stats: Mutex::new(DecodeStats::default()),
        });

        let workers = match spawn_workers(&shared, reader, &config) {
            Ok(workers) => workers,
            Err(err) => {
                // Workers already started wind down once the buffer closes.
                shared.stop.store(true, Ordering::Release);
                shared.buffer.close();
                let _ = control.shutdown();
                return Err(err);
            }
        };

        info!(
            source = %description,
            protocol = shared.protocol.name(),
            buffer_capacity = config.buffer_capacity,
            "channel opened"
        );

        Ok(Self {
            shared,
            writer: Mutex::new(Box::new(source)),
            control: Mutex::new(control),
            workers: Mutex::new(Some(workers)),
            config,
            description,
        })
    }

    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Decode counters as of the latest decoded message.
    pub fn stats(&self) -> DecodeStats {
        *self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.buffer.is_closed()
    }

    /// Why the channel ended, once it has.
    pub fn disconnect_reason(&self) -> Option<StreamError> {
        if !self.is_closed() {
            return None;
        }
        Some(self.shared.disconnect_reason())
    }

    pub fn has_pending_transaction(&self) -> bool {
        self.shared.transactions.is_pending()
    }

    pub fn register(&self, listener: Arc<dyn Listener<P::Message>>) -> ListenerId {
        self.shared.dispatcher.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.unregister(id)
    }

    /// Send `message` and wait for the reply the protocol correlates with
    /// it, up to `config.transaction_timeout`.
    pub fn request(&self, message: &P::Message) -> Result<P::Message> {
        self.request_with_timeout(message, self.config.transaction_timeout)
    }

    pub fn request_with_timeout(
        &self,
        message: &P::Message,
        timeout: Duration,
    ) -> Result<P::Message> {
        let protocol = Arc::clone(&self.shared.protocol);
        let request = message.clone();
        self.transact(message, timeout, move |reply| {
            protocol.correlates(&request, reply)
        })
    }

    /// Like [`request_with_timeout`](Self::request_with_timeout), with the
    /// reply chosen by `matcher` instead of the protocol's rule.
    pub fn request_matching<F>(
        &self,
        message: &P::Message,
        timeout: Duration,
        matcher: F,
    ) -> Result<P::Message>
    where
        F: Fn(&P::Message) -> bool + Send + 'static,
    {
        self.transact(message, timeout, matcher)
    }

    /// Write `message` without waiting for a reply.
    pub fn send(&self, message: &P::Message) -> Result<()> {
        let wire = self.encode(message)?;
        self.write_frame(&wire)
    }

    fn transact<F>(&self, message: &P::Message, timeout: Duration, matcher: F) -> Result<P::Message>
    where
        F: Fn(&P::Message) -> bool + Send + 'static,
    {
        let wire = self.encode(message)?;
        let ticket = self
            .shared
            .transactions
            .begin(matcher, timeout, self.config.busy_policy)?;
        if let Err(err) = self.write_frame(&wire) {
            self.shared.transactions.abort(ticket.id());
            return Err(err);
        }
        self.shared.transactions.wait(ticket)
    }

    fn encode(&self, message: &P::Message) -> Result<BytesMut> {
        let mut wire = BytesMut::new();
        self.shared.protocol.encode(message, &mut wire)?;
        Ok(wire)
    }

    fn write_frame(&self, wire: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(wire)?;
        writer.flush()?;
        trace!(len = wire.len(), "frame written");
        Ok(())
    }

    /// Stop the workers and wait for them.
    ///
    /// Buffered complete frames are still decoded and delivered, a pending
    /// transaction resolves as cancelled, and listeners get
    /// `on_disconnect`. Calling `close` again is a no-op.
    pub fn close(&self) {
        let Some(workers) = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        self.shared.stop.store(true, Ordering::Release);
        if let Err(err) = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown()
        {
            warn!(source = %self.description, error = %err, "failed to shut down source");
        }

        join_worker("reader", workers.reader);
        join_worker("decoder", workers.decoder);
        // A listener may close the channel from its own callback.
        if workers.dispatcher.thread().id() == thread::current().id() {
            debug!("close called from dispatch thread, not joining it");
        } else {
            join_worker("dispatcher", workers.dispatcher);
        }

        let stats = self.stats();
        info!(
            source = %self.description,
            protocol = self.shared.protocol.name(),
            reason = %self.shared.disconnect_reason(),
            messages = stats.messages,
            discarded = stats.discarded_bytes,
            "channel closed"
        );
    }
}

impl<P: Protocol> Drop for Channel<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: Protocol> fmt::Debug for Channel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("source", &self.description)
            .field("protocol", &self.shared.protocol.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_workers<P: Protocol>(
    shared: &Arc<Shared<P>>,
    source: Box<dyn StreamSource>,
    config: &ChannelConfig,
) -> Result<Workers> {
    let (tx, rx) = mpsc::channel();
    let name = shared.protocol.name();

    let reader = {
        let shared = Arc::clone(shared);
        let chunk_size = config.read_chunk_size;
        thread::Builder::new()
            .name(format!("devlink-{name}-reader"))
            .spawn(move || read_loop(&shared, source, chunk_size))?
    };
    let decoder = {
        let shared = Arc::clone(shared);
        let decoder = Decoder::new(config.scan);
        thread::Builder::new()
            .name(format!("devlink-{name}-decode"))
            .spawn(move || decode_loop(&shared, decoder, tx))?
    };
    let dispatcher = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("devlink-{name}-dispatch"))
            .spawn(move || dispatch_loop(&shared, rx))?
    };

    Ok(Workers {
        reader,
        decoder,
        dispatcher,
    })
}

fn read_loop<P: Protocol>(shared: &Shared<P>, mut source: Box<dyn StreamSource>, chunk_size: usize) {
    let mut chunk = vec![0u8; chunk_size];
    let reason = loop {
        if shared.stop.load(Ordering::Acquire) {
            break StreamError::Closed;
        }
        match read_chunk(shared, &mut *source, &mut chunk) {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => warn!(error = %err, "stream buffer overflow"),
            Err(err) => break stream_end(shared, &*source, err),
        }
    };
    shared.record_disconnect(reason);
    shared.buffer.close();
}

/// Move one chunk from `source` into the stream buffer. An idle poll is
/// not an error.
fn read_chunk<P: Protocol>(
    shared: &Shared<P>,
    source: &mut dyn StreamSource,
    chunk: &mut [u8],
) -> devlink_frame::Result<()> {
    let n = match source.read(chunk) {
        Ok(0) => return Err(StreamError::Eof.into()),
        Ok(n) => n,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            return Ok(());
        }
        Err(err) => return Err(StreamError::from(err).into()),
    };
    trace!(len = n, "read chunk");
    shared.buffer.push(&chunk[..n])?;
    Ok(())
}

/// Map the reader's fatal error to the channel's disconnect reason.
fn stream_end<P: Protocol>(shared: &Shared<P>, source: &dyn StreamSource, err: FrameError) -> StreamError {
    if shared.stop.load(Ordering::Acquire) {
        return StreamError::Closed;
    }
    match err {
        FrameError::Stream(StreamError::Eof) => {
            debug!(source = %source.describe(), "end of stream");
            StreamError::Eof
        }
        FrameError::Stream(err) => {
            error!(source = %source.describe(), error = %err, "stream read failed");
            err
        }
        // The buffer was closed under the reader.
        _ => StreamError::Closed,
    }
}

fn decode_loop<P: Protocol>(shared: &Shared<P>, mut decoder: Decoder, events: Sender<Event<P::Message>>) {
    let mut src: &StreamBuffer = &shared.buffer;
    let protocol: &P = &shared.protocol;
    while let Some(message) = decoder.next_message(protocol, &mut src) {
        *shared.stats.lock().unwrap_or_else(PoisonError::into_inner) = *decoder.stats();
        if let Some(unsolicited) = shared.transactions.offer(message) {
            if events.send(Event::Message(unsolicited)).is_err() {
                break;
            }
        }
    }
    *shared.stats.lock().unwrap_or_else(PoisonError::into_inner) = *decoder.stats();

    shared.transactions.cancel_all();
    let _ = events.send(Event::Disconnected(shared.disconnect_reason()));
}

fn dispatch_loop<P: Protocol>(shared: &Shared<P>, events: Receiver<Event<P::Message>>) {
    for event in events {
        match event {
            Event::Message(message) => shared.dispatcher.deliver(&message),
            Event::Disconnected(reason) => {
                shared.dispatcher.disconnect(&reason);
                break;
            }
        }
    }
}

fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(worker = name, "channel worker panicked");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use devlink_frame::{Iscp, IscpMessage};
    use devlink_transport::DeviceStream;

    use super::*;
    use crate::config::BusyPolicy;

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            poll_interval: Duration::from_millis(20),
            transaction_timeout: Duration::from_millis(500),
            ..ChannelConfig::default()
        }
    }

    fn open_pair(config: ChannelConfig) -> (Channel<Iscp>, DeviceStream) {
        let (local, device) = DeviceStream::unix_pair().unwrap();
        device.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let channel = Channel::open(local, Iscp::default(), config).unwrap();
        (channel, device)
    }

    /// Read one `\r`-terminated request from the device side.
    fn read_request(device: &mut DeviceStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut byte = [0u8; 1];
        while !request.ends_with(b"\r") {
            device.read_exact(&mut byte).unwrap();
            request.push(byte[0]);
        }
        request
    }

    #[derive(Default)]
    struct Collector {
        messages: Mutex<Vec<IscpMessage>>,
        disconnects: Mutex<Vec<StreamError>>,
        delay: Option<Duration>,
    }

    impl Collector {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn wait_for(&self, count: usize) -> Vec<IscpMessage> {
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                let messages = self.messages.lock().unwrap().clone();
                if messages.len() >= count || Instant::now() > deadline {
                    return messages;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl Listener<IscpMessage> for Collector {
        fn on_message(&self, message: &IscpMessage) {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.messages.lock().unwrap().push(message.clone());
        }

        fn on_disconnect(&self, reason: &StreamError) {
            self.disconnects.lock().unwrap().push(reason.clone());
        }
    }

    #[test]
    fn test_unsolicited_messages_reach_listener() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::default());
        channel.register(collector.clone());

        device.write_all(b"!1PWR01\x1a\r\n!1MVL2A\x1a\r\n").unwrap();
        let messages = collector.wait_for(2);
        assert_eq!(
            messages,
            vec![IscpMessage::new("PWR", "01"), IscpMessage::new("MVL", "2A")]
        );
        assert_eq!(channel.stats().messages, 2);
    }

    #[test]
    fn test_request_gets_correlated_reply() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::default());
        channel.register(collector.clone());

        let responder = thread::spawn(move || {
            let request = read_request(&mut device);
            assert_eq!(request, b"!1PWRQSTN\r");
            // An unrelated status update arrives ahead of the reply.
            device.write_all(b"!1MVL20\x1a\r\n!1PWR01\x1a\r\n").unwrap();
            device
        });

        let reply = channel.request(&IscpMessage::query("PWR")).unwrap();
        assert_eq!(reply, IscpMessage::new("PWR", "01"));
        let _device = responder.join().unwrap();

        // The reply went to the transaction only, the update to listeners only.
        assert_eq!(collector.wait_for(1), vec![IscpMessage::new("MVL", "20")]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(collector.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_timeout_leaves_channel_usable() {
        let (channel, mut device) = open_pair(test_config());

        let err = channel
            .request_with_timeout(&IscpMessage::query("PWR"), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        assert!(!channel.has_pending_transaction());
        assert_eq!(read_request(&mut device), b"!1PWRQSTN\r");

        let responder = thread::spawn(move || {
            read_request(&mut device);
            device.write_all(b"!1PWR00\x1a\r\n").unwrap();
            device
        });
        let reply = channel.request(&IscpMessage::query("PWR")).unwrap();
        assert_eq!(reply, IscpMessage::new("PWR", "00"));
        let _device = responder.join().unwrap();
    }

    #[test]
    fn test_custom_matcher_overrides_correlation() {
        let (channel, mut device) = open_pair(test_config());
        let responder = thread::spawn(move || {
            read_request(&mut device);
            device.write_all(b"!1NLSC0\x1a\r\n!1NLTOK\x1a\r\n").unwrap();
            device
        });

        let reply = channel
            .request_matching(
                &IscpMessage::new("NTC", "PLAY"),
                Duration::from_millis(500),
                |reply: &IscpMessage| reply.command == "NLT",
            )
            .unwrap();
        assert_eq!(reply, IscpMessage::new("NLT", "OK"));
        let _device = responder.join().unwrap();
    }

    #[test]
    fn test_panicking_matcher_keeps_channel_alive() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::default());
        channel.register(collector.clone());

        let responder = thread::spawn(move || {
            read_request(&mut device);
            device.write_all(b"!1NLTOK\x1a\r\n").unwrap();
            assert_eq!(read_request(&mut device), b"!1PWRQSTN\r");
            device.write_all(b"!1PWR01\x1a\r\n").unwrap();
            device
        });

        let err = channel
            .request_matching(
                &IscpMessage::new("NTC", "PLAY"),
                Duration::from_millis(100),
                |_: &IscpMessage| -> bool { panic!("matcher failed") },
            )
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        // The reply nobody matched went to listeners.
        assert_eq!(collector.wait_for(1), vec![IscpMessage::new("NLT", "OK")]);

        let reply = channel.request(&IscpMessage::query("PWR")).unwrap();
        assert_eq!(reply, IscpMessage::new("PWR", "01"));
        assert!(!channel.is_closed());
        assert!(collector.disconnects.lock().unwrap().is_empty());
        let _device = responder.join().unwrap();
    }

    #[test]
    fn test_double_registration_delivers_once() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::default());
        let first = channel.register(collector.clone());
        let second = channel.register(collector.clone());
        assert_eq!(first, second);

        device.write_all(b"!1PWR01\x1a\r\n").unwrap();
        collector.wait_for(1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(collector.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_slow_listener_keeps_order() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::slow(Duration::from_millis(50)));
        channel.register(collector.clone());

        device.write_all(b"!1PWR01\x1a\r\n").unwrap();
        device.write_all(b"!1PWR00\x1a\r\n").unwrap();
        assert_eq!(
            collector.wait_for(2),
            vec![IscpMessage::new("PWR", "01"), IscpMessage::new("PWR", "00")]
        );
    }

    #[test]
    fn test_slow_listener_does_not_stall_transactions() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::slow(Duration::from_millis(300)));
        channel.register(collector.clone());

        let responder = thread::spawn(move || {
            device.write_all(b"!1MVL10\x1a\r\n").unwrap();
            read_request(&mut device);
            device.write_all(b"!1PWR01\x1a\r\n").unwrap();
            device
        });
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        let reply = channel
            .request_with_timeout(&IscpMessage::query("PWR"), Duration::from_millis(200))
            .unwrap();
        assert_eq!(reply, IscpMessage::new("PWR", "01"));
        assert!(started.elapsed() < Duration::from_millis(200));
        let _device = responder.join().unwrap();
    }

    #[test]
    fn test_close_cancels_pending_request() {
        let (channel, _device) = open_pair(ChannelConfig {
            transaction_timeout: Duration::from_secs(5),
            ..test_config()
        });
        let channel = Arc::new(channel);

        let requester = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.request(&IscpMessage::query("PWR")))
        };
        while !channel.has_pending_transaction() {
            thread::sleep(Duration::from_millis(1));
        }

        channel.close();
        let err = requester.join().unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled));
        assert!(channel.is_closed());
        assert_eq!(channel.disconnect_reason(), Some(StreamError::Closed));

        let err = channel.request(&IscpMessage::query("PWR")).unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }

    #[test]
    fn test_eof_drains_frames_before_disconnect() {
        let (channel, mut device) = open_pair(test_config());
        let collector = Arc::new(Collector::slow(Duration::from_millis(10)));
        channel.register(collector.clone());

        device.write_all(b"!1PWR01\x1a\r\n!1MVL20\x1a\r\n!1AMT00\x1a\r\n").unwrap();
        drop(device);

        let deadline = Instant::now() + Duration::from_secs(2);
        while collector.disconnects.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(collector.messages.lock().unwrap().len(), 3);
        assert_eq!(*collector.disconnects.lock().unwrap(), vec![StreamError::Eof]);
        assert_eq!(channel.disconnect_reason(), Some(StreamError::Eof));

        channel.close();
        assert_eq!(collector.disconnects.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_listener_spares_others() {
        struct Faulty;
        impl Listener<IscpMessage> for Faulty {
            fn on_message(&self, _message: &IscpMessage) {
                panic!("faulty listener");
            }
        }

        let (channel, mut device) = open_pair(test_config());
        channel.register(Arc::new(Faulty));
        let collector = Arc::new(Collector::default());
        channel.register(collector.clone());

        device.write_all(b"!1PWR01\x1a\r\n!1PWR00\x1a\r\n").unwrap();
        assert_eq!(collector.wait_for(2).len(), 2);
    }

    #[test]
    fn test_fail_fast_reports_busy() {
        let (channel, _device) = open_pair(ChannelConfig {
            busy_policy: BusyPolicy::FailFast,
            transaction_timeout: Duration::from_millis(300),
            ..test_config()
        });
        let channel = Arc::new(channel);

        let first = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.request(&IscpMessage::query("PWR")))
        };
        while !channel.has_pending_transaction() {
            thread::sleep(Duration::from_millis(1));
        }

        let err = channel.request(&IscpMessage::query("MVL")).unwrap_err();
        assert!(matches!(err, ChannelError::Busy));
        assert!(matches!(first.join().unwrap(), Err(ChannelError::Timeout(_))));
    }

    #[test]
    fn test_unsolicited_garbage_is_counted_not_fatal() {
        let (channel, mut device) = open_pair(test_config());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        channel.register(Arc::new(move |_: &IscpMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        device.write_all(b"\x00\x13junk!1PWR01\x1a\r\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.stats().discarded_bytes, 6);
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_open_rejects_undersized_buffer() {
        let (local, _device) = DeviceStream::unix_pair().unwrap();
        let err = Channel::open(
            local,
            Iscp::default(),
            ChannelConfig {
                buffer_capacity: 16,
                ..ChannelConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_send_writes_encoded_frame() {
        let (channel, mut device) = open_pair(test_config());
        channel.send(&IscpMessage::new("PWR", "01")).unwrap();
        assert_eq!(read_request(&mut device), b"!1PWR01\r");
    }
}
