//! Logging configuration
//!
//! Loads from environment variables:
//! - RUST_LOG: Tracing level (debug, info, warn, error)
//! - MONITORING_ENABLED: Enable/disable logging setup (true/false)
//! - LOG_FORMAT: Console output format (json or text)
//! - LOG_DIR: Directory for log files (default: `<GS_HOME>/logs`)
//! - LOG_TO_FILE / LOG_TO_CONSOLE: Toggle either layer (true/false)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,

    /// Filter directive used when RUST_LOG is not set
    pub log_level: String,

    /// Format of the console layer. Files are always JSON.
    pub log_format: LogFormat,

    pub log_dir: PathBuf,

    pub enable_file_logging: bool,

    pub enable_console_logging: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(&self) -> &str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

impl MonitoringConfig {
    /// Defaults with log files under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_dir: log_dir.into(),
            enable_file_logging: true,
            enable_console_logging: true,
        }
    }

    /// Load configuration from environment variables, falling back to
    /// `default_log_dir` for the file layer.
    pub fn from_env(default_log_dir: &Path) -> Self {
        let mut config = Self::new(default_log_dir);

        if let Ok(enabled) = std::env::var("MONITORING_ENABLED") {
            config.enabled = is_true(&enabled);
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.log_level = log_level;
        }

        if let Ok(log_format) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = log_format.parse() {
                config.log_format = format;
            }
        }

        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(v) = std::env::var("LOG_TO_FILE") {
            config.enable_file_logging = is_true(&v);
        }

        if let Ok(v) = std::env::var("LOG_TO_CONSOLE") {
            config.enable_console_logging = is_true(&v);
        }

        config
    }

    /// Ensure log directory exists
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if !self.log_dir.exists() {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}

fn is_true(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")
}
