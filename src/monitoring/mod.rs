//! Monitoring module for grid-search
//!
//! Provides structured logging with tracing: a console layer and a daily
//! rotated JSON log file under the data directory.

pub mod config;
pub mod tracing_config;

pub use config::{LogFormat, MonitoringConfig};
pub use tracing_config::init_tracing;
