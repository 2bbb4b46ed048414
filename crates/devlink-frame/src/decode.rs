use tracing::{debug, warn};

use crate::codec::Protocol;
use crate::scanner::{DecodeStats, FrameScanner, ScanConfig};
use crate::source::{ByteSource, SliceSource};

/// Scanner, validator and codec chained into one decode loop.
///
/// Recoverable errors are absorbed and counted; the loop only ends when the
/// source is closed and drained.
#[derive(Debug, Default)]
pub struct Decoder {
    scanner: FrameScanner,
}

impl Decoder {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            scanner: FrameScanner::new(config),
        }
    }

    pub fn stats(&self) -> &DecodeStats {
        self.scanner.stats()
    }

    /// Decode the next message from `src`, or `None` at end of stream.
    pub fn next_message<P, S>(&mut self, protocol: &P, src: &mut S) -> Option<P::Message>
    where
        P: Protocol + ?Sized,
        S: ByteSource,
    {
        loop {
            let frame = self.scanner.next_frame(protocol, src)?;

            if let Err(err) = protocol.validate(&frame) {
                // Resume strictly after the invalid frame's first byte.
                src.reset_to_mark();
                let skipped = src.skip(1);
                let stats = self.scanner.stats_mut();
                stats.validation_errors += 1;
                stats.discarded_bytes += skipped as u64;
                warn!(
                    protocol = protocol.name(),
                    error = %err,
                    len = frame.len(),
                    "frame failed validation"
                );
                continue;
            }
            src.commit();
            self.scanner.stats_mut().frames += 1;

            match protocol.decode(&frame) {
                Ok(message) => {
                    self.scanner.stats_mut().messages += 1;
                    debug!(protocol = protocol.name(), len = frame.len(), "frame decoded");
                    return Some(message);
                }
                Err(err) => {
                    let stats = self.scanner.stats_mut();
                    stats.decode_errors += 1;
                    stats.discarded_bytes += frame.len() as u64;
                    debug!(
                        protocol = protocol.name(),
                        error = %err,
                        len = frame.len(),
                        "discarding undecodable frame"
                    );
                }
            }
        }
    }
}

/// Messages and counters from decoding a finished capture.
#[derive(Debug, Clone)]
pub struct DecodeReport<M> {
    pub messages: Vec<M>,
    pub stats: DecodeStats,
}

/// Run the full decode loop over an in-memory capture.
pub fn decode_bytes<P>(protocol: &P, bytes: &[u8]) -> DecodeReport<P::Message>
where
    P: Protocol + ?Sized,
{
    let mut src = SliceSource::new(bytes);
    let mut decoder = Decoder::default();
    let mut messages = Vec::new();
    while let Some(message) = decoder.next_message(protocol, &mut src) {
        messages.push(message);
    }
    DecodeReport {
        messages,
        stats: *decoder.stats(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;
    use crate::buffer::StreamBuffer;
    use crate::codec::MessageCodec;
    use crate::iscp::{Eiscp, Iscp, IscpMessage};
    use crate::modbus::{ModbusMessage, ModbusRole, ModbusRtu};
    use crate::rotel::{RotelHex, RotelMessage};

    fn eiscp_wire(message: &IscpMessage) -> Vec<u8> {
        let mut wire = BytesMut::new();
        Eiscp::default().encode(message, &mut wire).unwrap();
        wire.to_vec()
    }

    #[test]
    fn eiscp_between_garbage() {
        let mut wire = b"\x00\xffXYZ".to_vec();
        wire.extend_from_slice(&eiscp_wire(&IscpMessage::new("PWR", "01")));
        wire.extend_from_slice(b"IS");
        wire.extend_from_slice(&eiscp_wire(&IscpMessage::new("MVL", "2A")));

        let report = decode_bytes(&Eiscp::default(), &wire);
        assert_eq!(
            report.messages,
            vec![IscpMessage::new("PWR", "01"), IscpMessage::new("MVL", "2A")]
        );
        assert_eq!(report.stats.discarded_bytes, 7);
        assert_eq!(report.stats.frames, 2);
    }

    #[test]
    fn corrupt_modbus_frame_costs_one_byte_per_attempt() {
        let good = [0x01, 0x03, 0x02, 0x00, 0x2C, 0xB9, 0x99];
        let mut bad = good;
        bad[6] = 0x9A;

        let mut wire = bad.to_vec();
        wire.extend_from_slice(&good);
        let report = decode_bytes(&ModbusRtu::new(ModbusRole::Master), &wire);

        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].payload.as_ref(), &[0x02, 0x00, 0x2C]);
        assert!(report.stats.validation_errors >= 1);
        assert_eq!(report.stats.frames, 1);
    }

    #[test]
    fn serial_iscp_recovers_after_stray_marker() {
        let report = decode_bytes(&Iscp::default(), b"!x!1PWR01\r");
        assert_eq!(report.messages, vec![IscpMessage::new("PWR", "01")]);
        assert_eq!(report.stats.frames, 1);
        assert_eq!(report.stats.decode_errors, 0);
    }

    #[test]
    fn modbus_response_after_garbage_prefix() {
        let good = [0x01, 0x03, 0x02, 0x00, 0x2C, 0xB9, 0x99];
        // A plausible address and read function that runs into the real frame.
        let mut wire = vec![0x11, 0x01, 0x03, 0x7F];
        wire.extend_from_slice(&good);

        let report = decode_bytes(&ModbusRtu::new(ModbusRole::Master), &wire);
        assert_eq!(report.messages.len(), 1);
        assert_eq!(report.messages[0].address, 0x01);
        assert_eq!(report.messages[0].registers(), Some(vec![44]));
        assert_eq!(report.stats.discarded_bytes, 4);
    }

    #[test]
    fn longest_terminator_preferred_across_arrivals() {
        let buffer = Arc::new(StreamBuffer::new(256));
        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            producer.push(b"!1PWR01\x1a").unwrap();
            thread::sleep(Duration::from_millis(10));
            producer.push(b"\r\n!1MVL20\r").unwrap();
            producer.close();
        });

        let mut decoder = Decoder::new(ScanConfig {
            frame_timeout: Duration::from_secs(1),
            trailer_grace: Duration::from_millis(500),
        });
        let mut src: &StreamBuffer = &buffer;
        let protocol = Iscp::default();
        let first = decoder.next_message(&protocol, &mut src).unwrap();
        let second = decoder.next_message(&protocol, &mut src).unwrap();
        assert!(decoder.next_message(&protocol, &mut src).is_none());
        handle.join().unwrap();

        assert_eq!(first, IscpMessage::new("PWR", "01"));
        assert_eq!(second, IscpMessage::new("MVL", "20"));
        assert_eq!(decoder.stats().discarded_bytes, 0);
    }

    #[test]
    fn mid_frame_timeout_resumes_after_marker() {
        let buffer = Arc::new(StreamBuffer::new(256));
        let full = eiscp_wire(&IscpMessage::new("PWR", "00"));

        let producer = Arc::clone(&buffer);
        let wire = full.clone();
        let handle = thread::spawn(move || {
            // Header only, then silence past the frame timeout.
            producer.push(&wire[..10]).unwrap();
            thread::sleep(Duration::from_millis(200));
            producer.push(&wire).unwrap();
            producer.close();
        });

        let mut decoder = Decoder::new(ScanConfig {
            frame_timeout: Duration::from_millis(50),
            trailer_grace: Duration::from_millis(10),
        });
        let mut src: &StreamBuffer = &buffer;
        let message = decoder.next_message(&Eiscp::default(), &mut src).unwrap();
        handle.join().unwrap();

        assert_eq!(message, IscpMessage::new("PWR", "00"));
        let stats = decoder.stats();
        assert_eq!(stats.abandoned, 1);
        // "ISCP" skipped as the marker, then the six stale header bytes.
        assert_eq!(stats.discarded_bytes, 10);
    }

    #[test]
    fn close_with_partial_frame_ends_stream() {
        let buffer = StreamBuffer::new(64);
        buffer.push(&[0xFE, 0x05, 0x01]).unwrap();
        buffer.close();

        let mut decoder = Decoder::default();
        let mut src: &StreamBuffer = &buffer;
        assert!(decoder.next_message(&RotelHex::default(), &mut src).is_none());
        assert_eq!(decoder.stats().abandoned, 1);
        assert_eq!(buffer.available(), 0);
    }

    fn iscp_message() -> impl Strategy<Value = IscpMessage> {
        ("[1-9]", "[A-Z]{3}", "[A-Z0-9]{0,24}").prop_map(|(unit, command, value)| {
            IscpMessage::with_unit(unit.chars().next().unwrap_or('1'), &command, &value)
        })
    }

    /// Random bytes, weighted towards the start marker and terminators.
    fn iscp_noise() -> impl Strategy<Value = u8> {
        prop_oneof![
            4 => any::<u8>(),
            1 => Just(b'!'),
            1 => prop::sample::select(vec![0x1A, 0x0D, 0x0A]),
            1 => prop::sample::select(b"1PWRMVL".to_vec()),
        ]
    }

    fn rotel_message() -> impl Strategy<Value = RotelMessage> {
        (0u8..0xFD, 0u8..0xFD, prop::collection::vec(0u8..0xFD, 0..12))
            .prop_map(|(device_id, kind, data)| RotelMessage::new(device_id, kind, data))
    }

    proptest! {
        #[test]
        fn eiscp_resyncs_after_any_garbage(
            garbage in prop::collection::vec(prop_oneof![any::<u8>(), Just(b'I')], 0..64),
            message in iscp_message(),
        ) {
            let mut wire = garbage.clone();
            wire.extend_from_slice(&eiscp_wire(&message));

            let report = decode_bytes(&Eiscp::default(), &wire);
            prop_assert_eq!(report.messages, vec![message]);
            prop_assert_eq!(report.stats.discarded_bytes, garbage.len() as u64);
        }

        // Garbage may hold stray markers and even frames of its own, so
        // only the trailing frame is asserted.
        #[test]
        fn serial_iscp_resyncs_after_any_garbage(
            garbage in prop::collection::vec(iscp_noise(), 0..64),
            message in iscp_message(),
        ) {
            let mut wire = garbage.clone();
            let mut encoded = BytesMut::new();
            Iscp::default().encode(&message, &mut encoded).unwrap();
            wire.extend_from_slice(&encoded);

            let report = decode_bytes(&Iscp::default(), &wire);
            prop_assert_eq!(report.messages.last(), Some(&message));
            prop_assert!(report.stats.discarded_bytes <= garbage.len() as u64);
        }

        #[test]
        fn rotel_resyncs_after_any_garbage(
            garbage in prop::collection::vec(prop_oneof![any::<u8>(), Just(0xFE)], 0..64),
            message in rotel_message(),
        ) {
            let protocol = RotelHex::default();
            let mut wire = garbage.clone();
            let mut encoded = BytesMut::new();
            protocol.encode(&message, &mut encoded).unwrap();
            wire.extend_from_slice(&encoded);

            let report = decode_bytes(&protocol, &wire);
            prop_assert_eq!(report.messages.last(), Some(&message));
            prop_assert!(report.stats.discarded_bytes <= garbage.len() as u64);
        }

        #[test]
        fn modbus_frames_back_to_back(
            frames in prop::collection::vec(
                (1u8..=247, any::<u16>(), any::<u16>()),
                1..8,
            ),
        ) {
            let protocol = ModbusRtu::new(ModbusRole::Master);
            let messages: Vec<ModbusMessage> = frames
                .iter()
                .map(|&(address, register, value)| ModbusMessage::write_single_register(address, register, value))
                .collect();
            let mut wire = BytesMut::new();
            for message in &messages {
                protocol.encode(message, &mut wire).unwrap();
            }

            let report = decode_bytes(&protocol, &wire);
            prop_assert_eq!(report.messages, messages);
            prop_assert_eq!(report.stats.discarded_bytes, 0);
        }
    }

    proptest! {
        // A garbage candidate spanning into the frame passes CRC-16 once in
        // 65536 tries.
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn modbus_resyncs_after_any_garbage(
            garbage in prop::collection::vec(any::<u8>(), 0..64),
            address in 1u8..=247,
            register in any::<u16>(),
            value in any::<u16>(),
        ) {
            let protocol = ModbusRtu::new(ModbusRole::Master);
            let message = ModbusMessage::write_single_register(address, register, value);
            let mut wire = garbage.clone();
            let mut encoded = BytesMut::new();
            protocol.encode(&message, &mut encoded).unwrap();
            wire.extend_from_slice(&encoded);

            let report = decode_bytes(&protocol, &wire);
            prop_assert_eq!(report.messages.last(), Some(&message));
        }
    }
}
