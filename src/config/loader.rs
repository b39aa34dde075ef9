//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

use super::env::apply_env_overrides;
use super::sources::{config_root_dir, read_config_text, ConfigSource};
use super::{LoadedConfig, ProbeConfig};

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<ProbeConfig, ConfigError> {
    Ok(load_config_with_source(path_override)?.config)
}

/// Load configuration and report which file it came from.
pub fn load_config_with_source(path_override: Option<&str>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text(path_override, &read_file, &config_root)?;
    let mut config: ProbeConfig = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup)?;
    normalize(&mut config)?;
    if source != ConfigSource::BuiltInDefaults {
        debug!(source = ?source, "config loaded");
    }
    Ok(LoadedConfig { config, source })
}

fn normalize(config: &mut ProbeConfig) -> Result<(), ConfigError> {
    config.engine.provider = config.engine.provider.trim().to_string();
    if config.engine.provider.is_empty() {
        return Err(ConfigError::Invalid(
            "`engine.provider` must not be empty".to_string(),
        ));
    }
    // Zero would make every acknowledgement call time out immediately.
    config.bridge.call_timeout_secs = config.bridge.call_timeout_secs.max(1);
    if config.log.filter.trim().is_empty() {
        config.log.filter = super::types::DEFAULT_LOG_FILTER.to_string();
    }
    Ok(())
}
