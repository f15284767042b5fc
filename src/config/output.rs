//! Output stage configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One compact JSON document per line.
    #[default]
    Json,
    /// Indented JSON, one document after another.
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,

    /// Events buffered between the bridge and the writer.
    #[validate(range(min = 1, max = 1_000_000))]
    pub buffer: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            buffer: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_buffer_rejected() {
        let config = OutputConfig {
            buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
