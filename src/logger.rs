//! Global `tracing` subscriber setup.
//!
//! `LoggerManager` turns the `[logger]` section into a registry with a
//! console layer and, on systemd hosts, a journald layer. `RUST_LOG`
//! overrides the configured level for every layer.

use std::io;

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{
    fmt, fmt::format::FmtSpan, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LogTarget, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    /// A global subscriber was already installed.
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// The journald socket could not be opened and no other output is enabled.
    #[error("Journald logger unavailable: {0}")]
    JournaldUnavailable(#[source] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,
}

/// Builds and installs the logging layers described by a `LoggerConfig`.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` for an unknown level or an empty
    /// journald identifier.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once, before the first event.
    ///
    /// A journald failure is only fatal when journald is the sole output;
    /// with the console enabled it is reported and skipped.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.console_layer(console));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.journald_layer(&journald.identifier) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!("Journald logging as '{}'", journald.identifier);
                }
                Err(e) if layers.is_empty() => return Err(LoggerError::JournaldUnavailable(e)),
                Err(e) => {
                    print_warn!("Journald unavailable, console only: {}", e);
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn console_layer(&self, config: &ConsoleConfig) -> BoxedLayer {
        let writer = match config.target {
            LogTarget::Stdout => BoxMakeWriter::new(io::stdout),
            LogTarget::Stderr => BoxMakeWriter::new(io::stderr),
        };
        let spans = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_span_events(spans)
            .with_ansi(config.ansi_colors)
            .with_writer(writer);

        match config.format {
            LogFormat::Json => base.json().with_filter(self.filter()).boxed(),
            LogFormat::Pretty => base.pretty().with_filter(self.filter()).boxed(),
            LogFormat::Compact => base.compact().with_filter(self.filter()).boxed(),
        }
    }

    fn journald_layer(&self, identifier: &str) -> io::Result<BoxedLayer> {
        let layer = tracing_journald::layer()?.with_syslog_identifier(identifier.to_string());
        Ok(layer.with_filter(self.filter()).boxed())
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }
}
