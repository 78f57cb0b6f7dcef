//! Shared configuration utilities
//!
//! - Generic YAML config loading/saving
//! - Default config file location
//!
//! # Usage
//!
//! ```ignore
//! use soundcharm_core::config::{load_config, save_config, default_config_path};
//!
//! let path = default_config_path("config.yaml");
//! let config: MyAppConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

pub use io::{load_config, load_config_with_source, save_config, ConfigSource};
pub use paths::{default_config_dir, default_config_path};
