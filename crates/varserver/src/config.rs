//! Variable server connection settings.
//!
//! Deserialized from the `[varserver]` table of the application config and
//! checked with `validator` before any socket is opened. Every field has a
//! default, so an empty table connects to `localhost:7108` and retries once a
//! second forever.
//!
//! ```toml
//! [varserver]
//! host = "sim-host"
//! port = 7108
//! connection_timeout = 5
//! read_timeout = 10
//! reconnect_delay_ms = 1000
//! cycle_period = 0.1
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::backoff::Backoff;

/// Default Trick variable server port.
pub const DEFAULT_PORT: u16 = 7108;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_delays"))]
pub struct Config {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Seconds allowed for the TCP connect.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Seconds without a line before the session counts as stale.
    /// Unset means wait forever, which is what a paused simulation needs.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Read timeout must be between 1 and 3600 seconds"
    ))]
    pub read_timeout: Option<u64>,

    #[validate(range(
        min = 10,
        max = 600000,
        message = "Reconnect delay must be between 10 and 600000 milliseconds"
    ))]
    pub reconnect_delay_ms: u64,

    /// Upper bound when `backoff_multiplier` grows the delay.
    #[validate(range(
        min = 10,
        max = 3600000,
        message = "Max reconnect delay must be between 10 and 3600000 milliseconds"
    ))]
    pub max_reconnect_delay_ms: u64,

    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Backoff multiplier must be between 1.0 and 10.0"
    ))]
    pub backoff_multiplier: f64,

    /// 0 retries forever.
    pub max_reconnect_attempts: u32,

    /// Optional `trick.var_cycle` period in seconds.
    #[validate(range(
        min = 0.001,
        max = 3600.0,
        message = "Cycle period must be between 0.001 and 3600 seconds"
    ))]
    pub cycle_period: Option<f64>,

    /// Buffered snapshots between the connection task and the consumer.
    #[validate(range(
        min = 1,
        max = 1000000,
        message = "Channel capacity must be between 1 and 1000000"
    ))]
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connection_timeout: 5,
            read_timeout: None,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 1000,
            backoff_multiplier: 1.0,
            max_reconnect_attempts: 0,
            cycle_period: None,
            channel_capacity: 1024,
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Config {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port`, as passed to the resolver.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout.map(Duration::from_secs)
    }

    /// Builds the retry policy described by this config.
    pub fn backoff(&self) -> Backoff {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.reconnect_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
            self.backoff_multiplier,
        );
        backoff.set_max_attempts(self.max_reconnect_attempts);
        backoff
    }
}

fn validate_delays(config: &Config) -> Result<(), ValidationError> {
    if config.max_reconnect_delay_ms < config.reconnect_delay_ms {
        return Err(ValidationError::new("max_delay_below_initial").with_message(
            format!(
                "Max reconnect delay ({} ms) must not be below reconnect delay ({} ms)",
                config.max_reconnect_delay_ms, config.reconnect_delay_ms
            )
            .into(),
        ));
    }
    Ok(())
}
