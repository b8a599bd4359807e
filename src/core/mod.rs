//! Dashboard runtime: term catalog, history, tolerances, plot model,
//! export and the monitor loop with its sinks.

pub mod catalog;
pub mod control;
pub mod dashboard;
pub mod export;
pub mod history;
pub mod monitor;
pub mod readiness;
pub mod tolerance;
pub mod view;
