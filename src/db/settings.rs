//! User settings, stored as a JSON blob in the `app_config` table.
//!
//! Any serde type can be stored under a config type key; [`AppSettings`] is
//! the one the service itself reads at startup and writes on save.

use super::{Result, StoreError};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub server_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub hide_model_names: bool,
    /// Ollama options applied to every request. Sampling keys are overridden
    /// by the grid values.
    #[serde(default)]
    pub default_options: BTreeMap<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let default_options = [
            ("mirostat", json!(0)),
            ("mirostat_tau", json!(5.0)),
            ("mirostat_eta", json!(0.1)),
            ("num_ctx", json!(4096)),
            ("num_gqa", json!(1)),
            ("num_gpu", json!(50)),
            ("repeat_last_n", json!(64)),
            ("repeat_penalty", json!(1.1)),
            ("temperature", json!(0.7)),
            ("seed", json!(42)),
            ("tfs_z", json!(1.0)),
            ("top_k", json!(40)),
            ("top_p", json!(0.9)),
            ("stop", json!(["AI assistant:"])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            server_url: crate::config::DEFAULT_SERVER_URL.to_string(),
            request_timeout: crate::config::DEFAULT_REQUEST_TIMEOUT_SECS,
            system_prompt: String::new(),
            hide_model_names: false,
            default_options,
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StoreError::Validation(format!(
                "server_url must start with http:// or https://, got {:?}",
                self.server_url
            )));
        }
        if self.request_timeout == 0 {
            return Err(StoreError::Validation(
                "request_timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a config by type, deserializing from JSON.
/// Returns None if the config doesn't exist.
pub fn load<T: DeserializeOwned>(conn: &Connection, config_type: &str) -> Result<Option<T>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT config_json FROM app_config WHERE config_type = ?1",
            [config_type],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json_str) => {
            let config: T = serde_json::from_str(&json_str)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

/// Save a config by type, replacing any previous value.
pub fn save<T: Serialize>(conn: &Connection, config_type: &str, config: &T) -> Result<()> {
    let json_str =
        serde_json::to_string(config).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO app_config (config_type, config_json, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(config_type) DO UPDATE SET
            config_json = excluded.config_json,
            updated_at = excluded.updated_at",
        params![config_type, json_str, now],
    )?;
    Ok(())
}

/// Settings saved by the user, or `fallback` if none were saved yet.
pub fn load_settings(conn: &Connection, fallback: AppSettings) -> Result<AppSettings> {
    Ok(load(conn, SETTINGS_KEY)?.unwrap_or(fallback))
}

pub fn save_settings(conn: &Connection, settings: &AppSettings) -> Result<()> {
    settings.validate()?;
    save(conn, SETTINGS_KEY, settings)
}
