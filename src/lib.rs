//! Extendipede Library
//!
//! A command gate: untrusted command strings are checked against an
//! allowlist and a denylist, then run as a single program with argument
//! vectors (no shell), bounded by a timeout. The gate is exposed over a
//! small HTTP API and through the `extendipede` CLI.

pub mod config;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod server;
