//! Environment overrides.

use crate::error::ConfigError;

use super::ProbeConfig;

pub(super) const ENV_PROVIDER: &str = "PROBE_PROVIDER";
pub(super) const ENV_LOG: &str = "PROBE_LOG";
pub(super) const ENV_CALL_TIMEOUT_SECS: &str = "PROBE_CALL_TIMEOUT_SECS";

pub(super) fn apply_env_overrides<FEnv>(
    config: &mut ProbeConfig,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(provider) = non_empty(env_lookup(ENV_PROVIDER)) {
        config.engine.provider = provider;
    }
    if let Some(filter) = non_empty(env_lookup(ENV_LOG)) {
        config.log.filter = filter;
    }
    if let Some(timeout) = non_empty(env_lookup(ENV_CALL_TIMEOUT_SECS)) {
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid {ENV_CALL_TIMEOUT_SECS} value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        config.bridge.call_timeout_secs = parsed;
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
