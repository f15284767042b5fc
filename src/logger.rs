//! Logging initialization.
//!
//! `LoggerManager` validates the logging configuration and installs the global
//! `tracing` subscriber with a console layer, a journald layer, or both. The
//! console layer writes to stderr; stdout is reserved for events.

use std::io;

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to install global subscriber: {0}")]
    InitializationError(String),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald was requested but unavailable while console output is also on.
    #[error(
        "Failed to initialize journald logger while console logging is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once, before any tracing macro
    /// output is expected.
    ///
    /// # Errors
    ///
    /// Fails if no layer could be built, or if journald is unavailable while
    /// console output is enabled as well.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let layers = self.layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.init_console_logger(console_config, self.filter()));
        }

        // Journald layer (Linux/systemd only)
        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.init_journald_logger(journald_config, self.filter()) {
                Ok(journald_layer) => {
                    layers.push(journald_layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    /// `RUST_LOG` wins over the configured level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    fn init_console_logger(&self, config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
        let writer = io::stderr;
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
        }
    }

    fn init_journald_logger(
        &self,
        config: &JournaldConfig,
        filter: EnvFilter,
    ) -> Result<BoxedLayer, LoggerError> {
        let journald_layer =
            tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
        Ok(journald_layer.with_filter(filter).boxed())
    }
}
