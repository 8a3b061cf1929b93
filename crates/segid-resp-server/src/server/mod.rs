//! Server internals.
//!
//! - [`config`] - CLI/env configuration and the `cfg.` setting names.
//! - [`settings`] - live, persisted settings.
//! - [`service`] - command dispatch.
//! - [`listener`] / [`connection`] - the TCP accept loop and per-connection
//!   tasks.
//! - [`telemetry`] - logging, tracing and metrics.

pub mod config;
pub mod connection;
pub mod listener;
pub mod service;
pub mod settings;
pub mod telemetry;
