//! TOML-based configuration for channel endpoints.

use serde::Deserialize;

use crate::constants::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_RECV_TIMEOUT_MS, DEFAULT_THROTTLE_WINDOW};
use crate::error::LinkError;

/// Tunables for one channel endpoint.
///
/// All fields are optional in the TOML source and fall back to the defaults
/// in [`crate::constants`].
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Timeout applied to `recv` waits and throttle waits, in milliseconds.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Maximum number of sent-but-unacked messages. Zero disables throttling.
    #[serde(default = "default_throttle_window_size")]
    pub throttle_window_size: u64,

    /// Payloads larger than this are fragmented by the transport.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

fn default_recv_timeout_ms() -> u64 {
    DEFAULT_RECV_TIMEOUT_MS
}

fn default_throttle_window_size() -> u64 {
    DEFAULT_THROTTLE_WINDOW
}

fn default_max_payload_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            recv_timeout_ms: default_recv_timeout_ms(),
            throttle_window_size: default_throttle_window_size(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, LinkError> {
        toml::from_str(s).map_err(|e| LinkError::Config(format!("failed to parse config: {e}")))
    }
}
