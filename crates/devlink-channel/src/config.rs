use std::time::Duration;

use devlink_frame::{OverflowPolicy, ScanConfig, DEFAULT_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// What a request does while another transaction is pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the slot to free, within the request's own deadline.
    #[default]
    Wait,
    /// Fail immediately with [`ChannelError::Busy`].
    FailFast,
}

/// Runtime settings of a [`Channel`](crate::Channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Stream buffer capacity in bytes. Must hold the largest frame.
    pub buffer_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Bytes requested per read from the source.
    pub read_chunk_size: usize,
    /// Read timeout of the source, so the reader observes the stop flag.
    #[serde(with = "devlink_frame::serde_ms", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Default deadline of [`Channel::request`](crate::Channel::request).
    #[serde(with = "devlink_frame::serde_ms", rename = "transaction_timeout_ms")]
    pub transaction_timeout: Duration,
    pub busy_policy: BusyPolicy,
    pub scan: ScanConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            overflow: OverflowPolicy::default(),
            read_chunk_size: 1024,
            poll_interval: Duration::from_millis(100),
            transaction_timeout: Duration::from_secs(2),
            busy_policy: BusyPolicy::Wait,
            scan: ScanConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ChannelError::Config(e.to_string()))
    }

    /// Reject settings that cannot work for a protocol whose frames are up
    /// to `max_frame_len` bytes.
    pub fn validate(&self, max_frame_len: usize) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(ChannelError::Config("buffer_capacity must be > 0".to_string()));
        }
        if max_frame_len > self.buffer_capacity {
            return Err(ChannelError::Config(format!(
                "max frame length {max_frame_len} exceeds buffer_capacity {}",
                self.buffer_capacity
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(ChannelError::Config("read_chunk_size must be > 0".to_string()));
        }
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("transaction_timeout", self.transaction_timeout),
            ("scan.frame_timeout", self.scan.frame_timeout),
        ] {
            if value.is_zero() {
                return Err(ChannelError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}
