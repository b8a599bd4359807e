//! Application configuration loading, validation, and management.
//!
//! This module provides the top-level `Config` structure that aggregates
//! logging, variable server, term catalog, monitor and export settings. It
//! handles locating and loading the TOML file and validating the result.
//!
//! The configuration is loaded early in the application lifecycle and is
//! intended to remain immutable thereafter.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{export::ExportConfig, logger::LoggerConfig, monitor::MonitorConfig, terms::CatalogConfig};

pub mod export;
pub mod logger;
pub mod monitor;
pub mod terms;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TRICKWATCH_CONFIG";

/// Fallback configuration file location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/trickwatch/config.toml";

/// UTC timestamp prefix used by the `print_*` macros.
#[doc(hidden)]
pub fn stamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. They write to stderr, leaving stdout to the dashboard.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::stamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::stamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::stamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        )
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Generic configuration-related error with a descriptive message.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while accessing configuration files.
    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
///
/// Every section is optional in the file; missing sections take their
/// defaults, which describe the Orion trajectory dashboard against a local
/// simulation.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Variable server connection and subscription settings.
    #[validate(nested)]
    pub varserver: trickwatch_varserver::Config,

    #[validate(nested)]
    pub catalog: CatalogConfig,

    #[validate(nested)]
    pub monitor: MonitorConfig,

    #[validate(nested)]
    pub export: ExportConfig,
}

impl Config {
    /// Locates and loads the configuration.
    ///
    /// Priority:
    /// 1. `explicit` (the `--config` argument)
    /// 2. `TRICKWATCH_CONFIG` environment variable
    /// 3. `/etc/trickwatch/config.toml`
    ///
    /// When none of these is given or present, validated defaults are used.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the chosen file cannot be read, parsed, or
    /// validated.
    pub fn new(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::get_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => {
                print_warn!("No configuration file found, using built-in defaults");
                let config = Config::default();
                config
                    .validate()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                Ok(config)
            }
        }
    }

    fn get_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Some(path);
        }

        let fallback = Path::new(SYSTEM_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Some(fallback.to_path_buf());
        }

        None
    }

    /// Loads and validates configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Propagates IO, parsing, and validation errors as `ConfigError`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.varserver.port, trickwatch_varserver::config::DEFAULT_PORT);
        assert_eq!(config.catalog.time_term, "UTC Seconds (s)");
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
            [logger]
            level = "debug"

            [varserver]
            host = "sim-host"
            port = 40000
            cycle_period = 0.1

            [monitor]
            report_every = 5

            [export]
            csv_prefix = "run"
            "#,
        )
        .unwrap();
        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.varserver.addr(), "sim-host:40000");
        assert_eq!(config.varserver.cycle_period, Some(0.1));
        assert_eq!(config.monitor.report_every, 5);
        assert_eq!(config.export.csv_prefix, "run");
    }

    #[test]
    fn test_parse_error() {
        let err = Config::parse("[varserver\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_error() {
        let err = Config::parse("[varserver]\nport = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = Config::parse("[logger]\nlevel = \"chatty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[varserver]\nport = 7000").unwrap();

        let config = Config::new(Some(file.path())).unwrap();
        assert_eq!(config.varserver.port, 7000);
    }

    #[test]
    fn test_sample_configs() {
        let trajectory = Config::parse(include_str!("../../config/trajectory.toml")).unwrap();
        assert_eq!(trajectory.catalog.terms.len(), 4);
        assert_eq!(trajectory.monitor.tolerances.len(), 1);
        assert!(trajectory.monitor.plot.enabled);

        let forces = Config::parse(include_str!("../../config/forces.toml")).unwrap();
        let catalog = crate::core::catalog::Catalog::from_config(&forces.catalog).unwrap();
        assert_eq!(catalog.len(), 21);
        assert!(catalog.require_vector("Ammonia 2 X[Y,Z] (N)").is_ok());
    }

    #[test]
    fn test_print_macros_as_match_arms() {
        for outcome in [Ok(1), Err("boom")] {
            match outcome {
                Ok(n) => print_info!("loaded {n}"),
                Err(e) if e.is_empty() => print_error!("empty"),
                Err(e) => print_warn!("skipped: {}", e),
            }
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/trickwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }
}
