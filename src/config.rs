use crate::error::ConfigError;
use crate::media::CaptureConstraints;
use crate::peer::types::IceServerConfig;
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Logging defaults; RUST_LOG overrides either one
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peercall=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "peercall=info,webrtc=error";

/// How long a reachability probe waits for a matching candidate
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;

/// Settings for one client context
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CallConfig {
    /// Id this client is known by on the relay
    pub participant_id: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub constraints: CaptureConstraints,
    /// Relay fallback to probe at startup, diagnostics only
    pub relay_probe: Option<IceServerConfig>,
    pub probe_timeout_ms: u64,
    /// End the call if a disconnected transport does not recover in time.
    /// `None` keeps a disconnected session alive indefinitely.
    pub disconnect_grace_ms: Option<u64>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            participant_id: random_id(),
            ice_servers: default_ice_servers(),
            constraints: CaptureConstraints::default(),
            relay_probe: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            disconnect_grace_ms: None,
        }
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig {
            id: "default-stun".into(),
            ..IceServerConfig::stun("stun:stun.l.google.com:19302")
        },
        IceServerConfig {
            id: "default-stun-1".into(),
            ..IceServerConfig::stun("stun:stun1.l.google.com:19302")
        },
    ]
}

impl CallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant_id.is_empty() {
            return Err(ConfigError::Invalid("participant_id cannot be empty".into()));
        }
        for server in self.ice_servers.iter().chain(self.relay_probe.iter()) {
            server.validate().map_err(ConfigError::Invalid)?;
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Option<Duration> {
        self.disconnect_grace_ms.map(Duration::from_millis)
    }
}
