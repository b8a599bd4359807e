//! trickwatch: terminal dashboards for a running Trick simulation
//!
//! The variable server client lives in the `trickwatch-varserver` crate.
//! This crate builds the dashboard on top of it.
//!
//! ## Modules
//!
//! * `config`: Configuration structures, loading, validation, and defaults.
//!   TOML sections for the logger, variable server, term catalog, monitor
//!   and export, validated with the `validator` crate.
//!
//! * `core`: Runtime components:
//!   - Term catalog and terms files
//!   - Bounded sample history
//!   - Tolerance rules and breach detection
//!   - Plot view model and ASCII rendering
//!   - CSV export and per-term logs
//!   - Readiness tracking and the monitor loop with its sinks
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.

pub mod config;
pub mod core;
pub mod logger;
