//! Readiness of the dashboard to show live data.
//!
//! Readiness follows the variable server connection: the monitor only
//! reports data while the client is connected, and tells the user what it
//! is waiting for otherwise.

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, info};
use trickwatch_varserver::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    /// Connected and streaming.
    Ready,
    /// Waiting on the connection, with a human-readable reason.
    NotReadyYet(String),
    /// No connection state seen yet.
    Unknown,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        *self == ReadinessState::Ready
    }

    /// Why the dashboard is waiting; empty unless `NotReadyYet`.
    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReadyYet(reason) => reason,
            ReadinessState::Ready | ReadinessState::Unknown => "",
        }
    }
}

impl From<&ConnectionState> for ReadinessState {
    fn from(state: &ConnectionState) -> Self {
        let reason = match state {
            ConnectionState::Connected => return ReadinessState::Ready,
            ConnectionState::Connecting => "Connecting to variable server".to_string(),
            ConnectionState::Disconnected(cause) => format!("Disconnected: {cause}"),
            ConnectionState::Reconnecting(secs) => format!("Reconnecting in {secs:.1} sec"),
        };
        ReadinessState::NotReadyYet(reason)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Ready => f.write_str("ready"),
            ReadinessState::NotReadyYet(reason) => write!(f, "waiting ({reason})"),
            ReadinessState::Unknown => f.write_str("unknown"),
        }
    }
}

/// Shared readiness flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: watch::Sender<ReadinessState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadinessState::Unknown);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.tx.subscribe()
    }

    pub fn current_state(&self) -> ReadinessState {
        self.tx.borrow().clone()
    }

    /// Mirrors `connection` into this tracker on a background task until the
    /// connection side is dropped.
    pub fn start_listening(&self, connection: watch::Receiver<ConnectionState>) {
        let readiness = self.clone();
        tokio::spawn(async move { readiness.mirror(connection).await });
    }

    /// Replaces the state, logging only actual transitions.
    pub fn set_state(&self, state: ReadinessState) {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            previous = Some(std::mem::replace(current, state.clone()));
            true
        });

        if let Some(previous) = previous {
            if state.is_ready() {
                info!("Dashboard live ({previous} -> {state})");
            } else {
                debug!("Readiness: {previous} -> {state}");
            }
        }
    }

    async fn mirror(&self, mut connection: watch::Receiver<ConnectionState>) {
        loop {
            let state = ReadinessState::from(&*connection.borrow_and_update());
            self.set_state(state);
            if connection.changed().await.is_err() {
                break;
            }
        }
        debug!("Connection state channel closed, readiness no longer tracked");
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
