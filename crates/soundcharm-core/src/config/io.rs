//! YAML configuration files
//!
//! Reading never fails: whatever is wrong with the file, the caller gets a
//! usable config plus a [`ConfigSource`] saying where it came from.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Where a loaded config came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the file
    File,
    /// No file at the path; defaults
    Missing,
    /// The file could not be read; defaults
    Unreadable(String),
    /// The file is not valid YAML for the config type; defaults
    Malformed(String),
}

impl ConfigSource {
    pub fn is_default(&self) -> bool {
        !matches!(self, ConfigSource::File)
    }
}

/// Load a config, falling back to `T::default()` on any problem
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    load_config_with_source(path).0
}

/// Load a config and report where the values came from
pub fn load_config_with_source<T>(path: &Path) -> (T, ConfigSource)
where
    T: DeserializeOwned + Default,
{
    let source = match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigSource::Missing,
        Err(e) => ConfigSource::Unreadable(e.to_string()),
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("config: read {:?}", path);
                return (config, ConfigSource::File);
            }
            Err(e) => ConfigSource::Malformed(e.to_string()),
        },
    };

    match &source {
        ConfigSource::Missing => log::info!("config: no file at {:?}, using defaults", path),
        ConfigSource::Unreadable(e) => log::warn!("config: cannot read {:?} ({}), using defaults", path, e),
        ConfigSource::Malformed(e) => log::warn!("config: {:?} is malformed ({}), using defaults", path, e),
        ConfigSource::File => {}
    }
    (T::default(), source)
}

/// Write a config as YAML
///
/// The YAML goes to a temporary file next to `path` which then replaces it,
/// so an interrupted save leaves the previous file in place.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create config directory {:?}", dir))?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage config in {:?}", dir))?;
    staged
        .write_all(yaml.as_bytes())
        .context("Failed to write staged config")?;
    staged
        .persist(path)
        .with_context(|| format!("Failed to replace config file {:?}", path))?;

    log::info!("config: saved {:?} ({} bytes)", path, yaml.len());
    Ok(())
}
