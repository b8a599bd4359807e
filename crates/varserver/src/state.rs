//! Connection state of the variable server client.
//!
//! The kernel publishes these on a `tokio::sync::watch` channel so that the
//! dashboard can show "waiting for connection" instead of stale numbers.
//!
//! ```
//! use trickwatch_varserver::ConnectionState;
//!
//! let state = ConnectionState::Reconnecting(1.0);
//! assert_eq!(state.to_string(), "Reconnecting (in 1 seconds)");
//! assert_eq!(state.as_str(), "Reconnecting");
//! ```

use std::fmt;

/// Lifecycle of the connection to the simulation.
///
/// ```text
/// Connecting -> Connected -> Disconnected(reason) -> Reconnecting(secs) -> Connecting -> ...
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Opening the socket and sending the subscription commands.
    Connecting,

    /// Subscribed and receiving lines.
    Connected,

    /// The session ended. The string holds the reason, for example
    /// `"Variable server closed the connection"` or `"shutdown"`.
    Disconnected(String),

    /// Sleeping before the next attempt; seconds until it starts.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Short identifier for logs and status lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// The disconnect reason or the retry delay, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
