//! Configuration utilities.

pub mod toml_config;

pub use toml_config::{ConfigError, ConfigWarning, MediatorConfig, DEFAULT_CONFIG_FILE};
