//! Application configuration loading and validation.
//!
//! The top-level [`Config`] groups the logger, the NATS input and the stdout
//! output. It is read once from a TOML file at startup and stays immutable.
//!
//! ```toml
//! [logger]
//! level = "info"
//!
//! [input]
//! subjects = ["orders.>", "shipping"]
//! queue_group = "workers"
//!
//! [output]
//! format = "json"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use natsbee_nats::Config as InputConfig;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use validator::Validate;

use crate::config::{logger::LoggerConfig, output::OutputConfig};

pub mod logger;
pub mod output;

pub const CONFIG_ENV: &str = "NATSBEE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/natsbee/config.toml";

/// Current UTC time for the `print_*` macros.
pub fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Timestamped messages printed before the tracing subscriber exists.
/// They go to stderr because stdout carries events.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// NATS connection, subscriptions, codec and decoration.
    #[validate(nested)]
    pub input: InputConfig,

    #[validate(nested)]
    pub output: OutputConfig,
}

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be found, read, parsed or
    /// validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Priority:
    /// 1. `NATSBEE_CONFIG` environment variable
    /// 2. `/etc/natsbee/config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found. Set {CONFIG_ENV} or create {DEFAULT_CONFIG_PATH}"
        )))
    }

    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        Self::parse(&config_str)
    }

    /// Parses and validates a TOML document.
    pub fn parse(source: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
