//! Channel constructors for the supported stream sources.

use devlink_frame::Protocol;
#[cfg(unix)]
use devlink_transport::{DeviceStream, SerialPort, SerialSettings};
use devlink_transport::DEFAULT_CONNECT_TIMEOUT;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::Result;

/// Connect to `addr` (`host:port`) and open a channel over the socket.
pub fn connect_tcp<P: Protocol>(addr: &str, protocol: P, config: ChannelConfig) -> Result<Channel<P>> {
    let stream = devlink_transport::connect_tcp(addr, DEFAULT_CONNECT_TIMEOUT)?;
    Channel::open(stream, protocol, config)
}

/// Open the serial device at `path` and a channel over it.
#[cfg(unix)]
pub fn open_serial<P: Protocol>(
    path: &str,
    settings: &SerialSettings,
    protocol: P,
    config: ChannelConfig,
) -> Result<Channel<P>> {
    let port = SerialPort::open(path, settings)?;
    Channel::open(DeviceStream::from_serial(port), protocol, config)
}

/// Open a channel over one end of a connected socket pair.
///
/// The returned stream plays the device: bytes written to it are decoded by
/// the channel, and requests sent by the channel can be read from it.
#[cfg(unix)]
pub fn open_loopback<P: Protocol>(protocol: P, config: ChannelConfig) -> Result<(Channel<P>, DeviceStream)> {
    let (local, device) = DeviceStream::unix_pair()?;
    let channel = Channel::open(local, protocol, config)?;
    Ok((channel, device))
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use devlink_frame::{Eiscp, IscpMessage, MessageCodec};

    use super::*;

    #[test]
    fn tcp_channel_decodes_eiscp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut wire = bytes::BytesMut::new();
            Eiscp::default()
                .encode(&IscpMessage::new("PWR", "01"), &mut wire)
                .unwrap();
            // Let the client register its listener first.
            thread::sleep(Duration::from_millis(100));
            stream.write_all(&wire).unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let channel = connect_tcp(&addr, Eiscp::default(), ChannelConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        channel.register(Arc::new(move |message: &IscpMessage| {
            let _ = tx.lock().unwrap().send(message.clone());
        }));

        let message = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message, IscpMessage::new("PWR", "01"));
        server.join().unwrap();
    }

    #[test]
    fn tcp_connect_failure_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect_tcp(&addr, Eiscp::default(), ChannelConfig::default()).unwrap_err();
        assert!(matches!(err, crate::ChannelError::Transport(_)));
    }

    #[test]
    fn loopback_request_roundtrip() {
        let (channel, mut device) = open_loopback(Eiscp::default(), ChannelConfig::default()).unwrap();
        let responder = thread::spawn(move || {
            let mut wire = bytes::BytesMut::new();
            Eiscp::default()
                .encode(&IscpMessage::new("MVL", "32"), &mut wire)
                .unwrap();
            // Give the request time to register before answering.
            thread::sleep(Duration::from_millis(50));
            device.write_all(&wire).unwrap();
            device
        });

        let reply = channel
            .request_with_timeout(&IscpMessage::query("MVL"), Duration::from_secs(1))
            .unwrap();
        assert_eq!(reply, IscpMessage::new("MVL", "32"));
        let _device = responder.join().unwrap();
    }

    #[test]
    fn missing_serial_device_is_transport_error() {
        let err = open_serial(
            "/dev/devlink-does-not-exist",
            &SerialSettings::default(),
            Eiscp::default(),
            ChannelConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::ChannelError::Transport(_)));
    }
}
