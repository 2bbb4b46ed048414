use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codec::{FrameBounds, FrameFormat, Probe, RawFrame};
use crate::error::{BufferError, FramingError};
use crate::source::ByteSource;

/// Default time a candidate may take to complete after its first byte.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default wait for a longer terminator once a shorter one matched.
pub const DEFAULT_TRAILER_GRACE: Duration = Duration::from_millis(50);

/// Scanner timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    #[serde(with = "crate::serde_ms", rename = "frame_timeout_ms")]
    pub frame_timeout: Duration,
    #[serde(with = "crate::serde_ms", rename = "trailer_grace_ms")]
    pub trailer_grace: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            trailer_grace: DEFAULT_TRAILER_GRACE,
        }
    }
}

/// Counters kept by the decode loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Frames that passed validation.
    pub frames: u64,
    /// Messages decoded from those frames.
    pub messages: u64,
    /// Bytes skipped while resynchronizing or dropped with undecodable frames.
    pub discarded_bytes: u64,
    /// Candidates rejected by the protocol's framing rules.
    pub framing_errors: u64,
    /// Complete candidates that failed their integrity check.
    pub validation_errors: u64,
    /// Validated frames with no known message shape.
    pub decode_errors: u64,
    /// Candidates given up after a timeout or end of stream mid-frame.
    pub abandoned: u64,
}

enum Outcome {
    Frame(FrameBounds),
    Rejected(FramingError),
    Abandoned { closed: bool },
}

/// Finds candidate frames in a [`ByteSource`].
///
/// A returned frame has been consumed, but its start stays marked so the
/// caller can either `commit()` it or reset and skip one byte after a
/// failed validation.
#[derive(Debug)]
pub struct FrameScanner {
    config: ScanConfig,
    stats: DecodeStats,
    candidate: Vec<u8>,
}

impl FrameScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            stats: DecodeStats::default(),
            candidate: Vec::new(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut DecodeStats {
        &mut self.stats
    }

    /// Scan for the next complete candidate frame.
    ///
    /// Returns `None` once the source is closed and no complete frame is
    /// left in it.
    pub fn next_frame<F, S>(&mut self, format: &F, src: &mut S) -> Option<RawFrame>
    where
        F: FrameFormat + ?Sized,
        S: ByteSource,
    {
        loop {
            src.mark();
            self.candidate.clear();

            // Waiting for the first byte of a frame has no deadline.
            if src.read_into(&mut self.candidate, 1, None).is_err() {
                src.commit();
                return None;
            }
            let frame_deadline = Instant::now() + self.config.frame_timeout;

            match self.grow(format, src, frame_deadline) {
                Outcome::Frame(bounds) => {
                    // Give back look-ahead bytes past the frame end.
                    src.reset_to_mark();
                    src.skip(bounds.len);
                    self.candidate.truncate(bounds.len);
                    trace!(protocol = format.name(), len = bounds.len, "frame candidate complete");
                    return Some(RawFrame::new(
                        Bytes::copy_from_slice(&self.candidate),
                        bounds.header_len,
                        bounds.trailer_len,
                    ));
                }
                Outcome::Rejected(err) => {
                    src.reset_to_mark();
                    let skipped = src.skip(1);
                    self.stats.discarded_bytes += skipped as u64;
                    if err == FramingError::NoMarker {
                        trace!(protocol = format.name(), byte = self.candidate[0], "resync");
                    } else {
                        self.stats.framing_errors += 1;
                        debug!(protocol = format.name(), error = %err, "rejected frame candidate");
                    }
                }
                Outcome::Abandoned { closed } => {
                    let captured = self.candidate.len();
                    let skip = format.marker_len().min(captured).max(1);
                    src.reset_to_mark();
                    let skipped = src.skip(skip);
                    self.stats.abandoned += 1;
                    self.stats.discarded_bytes += skipped as u64;
                    warn!(
                        protocol = format.name(),
                        captured,
                        discarded = skipped,
                        closed,
                        "abandoned incomplete frame candidate"
                    );
                }
            }
        }
    }

    fn grow<F, S>(&mut self, format: &F, src: &mut S, frame_deadline: Instant) -> Outcome
    where
        F: FrameFormat + ?Sized,
        S: ByteSource,
    {
        loop {
            let have = self.candidate.len();
            let (need, deadline, fallback) = match format.probe(&self.candidate) {
                Ok(Probe::Complete(bounds)) if bounds.len > 0 && bounds.len <= have => {
                    return Outcome::Frame(bounds);
                }
                Ok(Probe::Complete(bounds)) => (bounds.len, frame_deadline, None),
                Ok(Probe::Need(need)) => (need, frame_deadline, None),
                Ok(Probe::Extend { need, fallback }) => {
                    let grace = Instant::now() + self.config.trailer_grace;
                    (need, grace.min(frame_deadline), Some(fallback))
                }
                Err(err) => return Outcome::Rejected(err),
            };

            if need > format.max_frame_len() {
                if let Some(fallback) = fallback {
                    return Outcome::Frame(fallback);
                }
                return Outcome::Rejected(FramingError::AbsurdLength {
                    declared: need,
                    max: format.max_frame_len(),
                });
            }

            let more = need.saturating_sub(have).max(1);
            if let Err(err) = src.read_into(&mut self.candidate, more, Some(deadline)) {
                if let Some(fallback) = fallback {
                    return Outcome::Frame(fallback);
                }
                return Outcome::Abandoned {
                    closed: err == BufferError::Closed,
                };
            }
        }
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}
