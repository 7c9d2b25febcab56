//! Tally-Watch - unread-count monitor
//!
//! Probes a web page for a numeric signal on a jittered cadence, alerts when
//! it increases, and reports its own health to a remote collector.

pub mod config;
pub mod engine;
pub mod network;
pub mod ops;
pub mod persistence;
pub mod refinery;

pub use config::{Configuration, ConfigSource, FileConfigSource};
pub use engine::{Monitor, MonitorDeps, MonitorError, ProbeResult};
