//! Error types for the variable server client.
//!
//! `ClientError` is the umbrella type returned by sessions, the connection
//! kernel and the manager. Parsing problems are reported separately as
//! `ProtocolError` so the kernel can skip a bad line without tearing down an
//! otherwise healthy connection.

use std::io;

use thiserror::Error;

use super::backoff::BackoffError;

/// Problems with a single line received from the variable server.
///
/// None of these are fatal for the connection: the offending frame is
/// dropped and streaming continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The line carried fewer value fields than subscribed variables.
    #[error("Incomplete frame: expected {expected} values, got {got}")]
    Incomplete { expected: usize, got: usize },

    /// A value field could not be read as a floating-point number.
    #[error("Invalid number in field {index}: '{value}'")]
    InvalidNumber { index: usize, value: String },

    /// The line was empty after stripping the terminator.
    #[error("Empty frame")]
    Empty,

    /// The line held bytes that are not UTF-8.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// No line terminator within `limit` bytes; the rest of the line was discarded.
    #[error("Frame exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Problems building a subscription from named channels.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubscriptionError {
    /// Two channels share the same label.
    #[error("Duplicate channel label: {0}")]
    DuplicateLabel(String),

    /// A variable name would break the command stream (quote or newline).
    #[error("Invalid variable name '{0}': quotes and line breaks are not allowed")]
    InvalidVariable(String),

    /// A vector term did not list exactly three components.
    #[error("Vector channel '{label}' needs 3 components, got {got}")]
    ComponentCount { label: String, got: usize },

    /// A label or variable was empty.
    #[error("Empty {0}")]
    Empty(&'static str),

    /// The subscription has no channels at all.
    #[error("Subscription has no channels")]
    NoChannels,
}

/// The unified error type for variable server operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket level failure (connect, read or write).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The TCP connection was not established within the configured timeout.
    #[error("Connection to {addr} timed out after {seconds}s")]
    ConnectTimeout { addr: String, seconds: u64 },

    /// The configured host did not resolve to any address.
    #[error("Cannot resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    /// No line arrived within the configured read timeout.
    #[error("No data from variable server for {0:.1}s")]
    Stale(f64),

    /// The server closed the stream (EOF).
    #[error("Variable server closed the connection")]
    Closed,

    /// A frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The subscription definition is invalid.
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Backoff gave up after the configured number of attempts.
    #[error("Retry policy exhausted: {0}")]
    RetriesPolicy(#[from] BackoffError),

    /// The consumer dropped the snapshot channel.
    #[error("Snapshot receiver dropped")]
    ChannelClosed,

    /// The connection task panicked or was aborted.
    #[error("Connection task failed: {0}")]
    Join(String),
}

impl From<validator::ValidationErrors> for ClientError {
    fn from(e: validator::ValidationErrors) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl ClientError {
    /// True for errors the reconnect loop should not retry.
    ///
    /// Mirrors how local misconfiguration shows up at the socket layer:
    /// a bad address or missing permissions will not heal by waiting.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::AddrInUse
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::InvalidInput
                    | io::ErrorKind::AddrNotAvailable
            ),
            ClientError::Resolve { .. }
            | ClientError::Subscription(_)
            | ClientError::Config(_)
            | ClientError::RetriesPolicy(_)
            | ClientError::Join(_) => true,
            ClientError::ConnectTimeout { .. }
            | ClientError::Stale(_)
            | ClientError::Closed
            | ClientError::Protocol(_)
            | ClientError::ChannelClosed => false,
        }
    }
}

/// Extracts the innermost error message from an error chain.
pub(crate) fn root_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
