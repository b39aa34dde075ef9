//! Config-file source discovery.
//!
//! Source order: explicit path > local file > global file > built-in defaults.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub(super) const CONFIG_FILE_NAME: &str = "probe.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Config loaded from explicit `--config` path.
    Explicit(PathBuf),
    /// Config loaded from `./probe.toml`.
    Local,
    /// Config loaded from the user config directory.
    Global(PathBuf),
    /// No file found; defaults were used.
    BuiltInDefaults,
}

/// Read config text from the highest-precedence available source.
pub(super) fn read_config_text<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // An explicit path must exist; the fallbacks are optional.
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        let text = read_file(&path)?;
        return Ok((text, ConfigSource::Explicit(path)));
    }

    if let Some(text) = read_optional(read_file, Path::new(CONFIG_FILE_NAME))? {
        return Ok((text, ConfigSource::Local));
    }
    if let Some(dir) = config_root() {
        let global = dir.join("probe").join(CONFIG_FILE_NAME);
        if let Some(text) = read_optional(read_file, &global)? {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

/// Only a missing file falls through; an unreadable one is an error.
fn read_optional<FRead>(read_file: &FRead, path: &Path) -> Result<Option<String>, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
{
    match read_file(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Root directory for user-level config: `$XDG_CONFIG_HOME`, else the
/// platform config directory.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::config_dir().or_else(|| dirs::home_dir().map(|home| home.join(".config")))
}
