//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`PROBE_PROVIDER`, `PROBE_LOG`,
//!    `PROBE_CALL_TIMEOUT_SECS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./probe.toml in the current directory
//! 4. $XDG_CONFIG_HOME/probe/probe.toml (or the platform config directory)
//! 5. Built-in defaults

mod env;
mod loader;
mod sources;
mod types;

pub use loader::{load_config, load_config_with_source};
pub use sources::{config_root_dir, ConfigSource};
pub use types::{BridgeConfig, EngineConfig, LogConfig, ProbeConfig};

/// Loaded config plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProbeConfig,
    pub source: ConfigSource,
}
