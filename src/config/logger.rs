//! Logging configuration structures and validation logic.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Available formats for console log output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum LogFormat {
    #[default]
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "pretty")]
    Pretty,
    #[serde(rename = "json")]
    Json,
}

/// Top-level logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// Global log level. Valid values: trace, debug, info, warn, error (case-insensitive).
    /// `RUST_LOG` takes precedence when set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some(format!("Invalid log level: {}", level).into());
            Err(err)
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            console: Some(ConsoleConfig::default()),
            journald: Some(JournaldConfig::default()),
        }
    }
}

/// Console log output. Always written to stderr.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    #[serde(default)]
    pub format: LogFormat,

    /// Include the module path in output.
    pub show_target: bool,

    pub show_thread_ids: bool,

    /// Emit an event when a span closes.
    pub show_spans: bool,

    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

/// systemd journald output (Unix only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JournaldConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `SYSLOG_IDENTIFIER` of journal entries.
    #[validate(length(min = 1))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "natsbee".to_string(),
        }
    }
}
