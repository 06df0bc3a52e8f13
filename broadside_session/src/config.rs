// Session configuration: transport timing plus the ready-resend budget.
//
// Loaded from JSON with `SessionConfig::from_json`; every field is optional
// and falls back to `Default`. See `broadside_relay::config` for the transport
// knobs.

use std::time::Duration;

use broadside_relay::TransportConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid session config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("ready_resend_interval_ms must be positive")]
    ZeroResendInterval,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    /// Interval between `client_ready` rebroadcasts while waiting in the lobby.
    pub ready_resend_interval_ms: u64,
    /// Rebroadcasts allowed per ready transition.
    pub ready_resend_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            ready_resend_interval_ms: 3_000,
            ready_resend_limit: 10,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        if config.ready_resend_interval_ms == 0 {
            return Err(ConfigError::ZeroResendInterval);
        }
        Ok(config)
    }

    pub fn ready_resend_interval(&self) -> Duration {
        Duration::from_millis(self.ready_resend_interval_ms)
    }
}
