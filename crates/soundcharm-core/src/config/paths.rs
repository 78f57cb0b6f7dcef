//! Standard locations for SoundCharm configuration files

use std::path::PathBuf;

/// Get the SoundCharm config directory
///
/// Returns: `<platform config dir>/soundcharm`, falling back to `./soundcharm`
/// when the platform reports no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundcharm")
}

/// Get the default config file path
///
/// Returns: `<config dir>/soundcharm/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
