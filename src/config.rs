// grid-search/src/config.rs
use crate::path_manager::{PathError, PathManager};
use std::env;
use thiserror::Error;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:11434/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got {value:?}")]
    InvalidVar {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Fallback Ollama URL used until the user saves settings.
    pub ollama_url: String,
    /// Fallback per-request timeout in seconds.
    pub request_timeout: u64,
    pub path_manager: PathManager,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let skip_dotenv = env::var("NO_DOTENV")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);
        if !skip_dotenv {
            dotenvy::dotenv().ok();
        }

        let host = env::var("BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("BACKEND_PORT", "3010", "u16")?;
        let ollama_url = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let request_timeout = parse_var(
            "REQUEST_TIMEOUT",
            &DEFAULT_REQUEST_TIMEOUT_SECS.to_string(),
            "number of seconds",
        )?;
        let path_manager = PathManager::new()?;

        Ok(Self {
            host,
            port,
            ollama_url,
            request_timeout,
            path_manager,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        key,
        expected,
        value,
    })
}
