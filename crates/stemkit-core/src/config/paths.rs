//! Standard locations for stemkit configuration

use std::path::PathBuf;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "STEMKIT_CONFIG";

/// Default config file path: `{config_dir}/stemkit/config.yaml`
///
/// Falls back to the current directory when the platform has no config dir
/// (e.g. inside a mobile app sandbox).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stemkit")
        .join("config.yaml")
}

/// Config path from `STEMKIT_CONFIG`, or the default path
pub fn resolve_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => default_config_path(),
    }
}
