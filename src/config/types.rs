//! Config data types and serde defaults.

use serde::Deserialize;

pub(super) const DEFAULT_PROVIDER_ID: &str = "probe";
pub(super) const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub(super) const DEFAULT_LOG_FILTER: &str = "info";

/// Fully resolved configuration used by the engine and the binary.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub engine: EngineConfig,
    pub bridge: BridgeConfig,
    pub log: LogConfig,
}

/// Which registered provider the coordinator resolves requests with.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub provider: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Upper bound for acknowledgement calls across the bridge. `invoke`
    /// itself is bounded only by cancellation.
    pub call_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive string.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}
