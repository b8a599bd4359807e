//! Logging configuration structures and validation logic.
//!
//! Controls the `tracing` subscriber built by [`crate::logger::LoggerManager`].
//! Console logs go to stderr unless configured otherwise, since stdout belongs
//! to the dashboard readout.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Available formats for console log output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Stream the console layer writes to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Stdout,
    #[default]
    Stderr,
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

    /// systemd journald output.
    #[validate(nested)]
    pub journald: Option<JournaldConfig>,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")
            .with_message(format!("Invalid log level: {level}").into())),
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

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    pub format: LogFormat,

    pub target: LogTarget,

    /// Include the module path in output.
    pub show_target: bool,

    pub show_thread_ids: bool,

    /// Include span close events in output.
    pub show_spans: bool,

    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            target: LogTarget::default(),
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

/// Configuration for systemd journald output (Unix only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JournaldConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Identifier used for journal entries. Must be non-empty.
    #[validate(length(min = 1))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "trickwatch".to_string(),
        }
    }
}
