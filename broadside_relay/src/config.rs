// Timing knobs for the transport session.
//
// All durations are stored as milliseconds so the struct round-trips through
// JSON config files unchanged; the `*_duration()` helpers convert for use with
// `Instant` arithmetic. Missing fields fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How often a `Heartbeat` is sent while connected.
    pub heartbeat_interval_ms: u64,
    /// Silence (no inbound message of any kind) longer than this drops the
    /// link and starts reconnecting.
    pub heartbeat_timeout_ms: u64,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base_delay_ms: u64,
    /// Ceiling for the reconnect delay.
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up for good.
    pub max_reconnect_attempts: u32,
    /// Time allowed between opening a link and the relay acknowledging the
    /// create/join handshake.
    pub handshake_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 10_000,
            max_reconnect_attempts: 5,
            handshake_timeout_ms: 20_000,
        }
    }
}

impl TransportConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let ms = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(ms)
    }
}
