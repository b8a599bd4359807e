//! trickwatch-varserver: client for the Trick simulation variable server.
//!
//! The variable server is a TCP service inside a running Trick simulation.
//! A client sends a handful of text commands naming the variables it wants,
//! and the server streams one tab-separated line of values per cycle until
//! told otherwise.
//!
//! ## Modules
//!
//! * `protocol` - command text and line splitting
//! * `subscription` - labelled scalar and 3-vector channels over the flat
//!   variable list, and the `Snapshot` they decode into
//! * `connection` - a single `Session` and the reconnecting `ConnectionKernel`
//! * `manager` - `VarServerManager`/`VarServerInstance` and `fetch_once`
//! * `config`, `backoff`, `state`, `error` - supporting types
//!
//! ## Failure model
//!
//! Anything that goes wrong with a live connection (EOF, reset, stale read)
//! closes it and reconnects after a fixed one second delay, forever, unless
//! configured otherwise. Malformed lines are skipped without reconnecting.
//! Only local misconfiguration stops the client.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod state;
pub mod subscription;

pub use backoff::{Backoff, BackoffError};
pub use config::Config;
pub use connection::{ConnectionKernel, Session};
pub use error::{ClientError, ProtocolError, SubscriptionError};
pub use manager::{fetch_once, VarServerInstance, VarServerManager};
pub use protocol::{Command, Frame};
pub use state::ConnectionState;
pub use subscription::{Channel, ChannelKind, Component, Snapshot, Subscription, Value};
