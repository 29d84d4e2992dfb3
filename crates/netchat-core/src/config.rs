//! Comms configuration
//!
//! Passed to [`CommsManager::new`](crate::CommsManager::new); nothing here is
//! process-global.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{NetchatError, Result};
use crate::serialization::SendReceiveOptions;
use crate::wire::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for a comms manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    /// Upper bound on establishing a connection; `None` waits indefinitely
    pub connection_establish_timeout_ms: Option<u64>,
    /// Options used when a send does not supply its own
    pub default_send_receive_options: SendReceiveOptions,
    /// Largest frame accepted or sent, in bytes
    pub max_frame_size: usize,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            connection_establish_timeout_ms: Some(10_000),
            default_send_receive_options: SendReceiveOptions::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl CommsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the establish timeout; `None` disables it
    pub fn with_connection_establish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_establish_timeout_ms =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_default_send_receive_options(mut self, options: SendReceiveOptions) -> Self {
        self.default_send_receive_options = options;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn connection_establish_timeout(&self) -> Option<Duration> {
        self.connection_establish_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(NetchatError::config_error("max_frame_size must be non-zero"));
        }
        if u32::try_from(self.max_frame_size).is_err() {
            return Err(NetchatError::config_error(
                "max_frame_size must fit the 32-bit frame length prefix",
            ));
        }
        Ok(())
    }
}
