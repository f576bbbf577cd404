// src/backend/mod.rs
// Inference backend abstraction - the grid engine only talks to this trait

pub mod ollama;

pub use ollama::OllamaBackend;

use crate::db::settings::AppSettings;
use crate::grid::ParamIteration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reported when the server does not answer the version probe.
pub const VERSION_UNAVAILABLE: &str = "_(Version Unavailable)";

/// Result of one generation as reported by the backend. Durations are in
/// nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub response: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub total_duration: u64,
}

impl InferenceResult {
    /// Generated tokens per second of total duration, rounded to 2 decimals.
    pub fn tokens_per_second(&self) -> f64 {
        if self.total_duration == 0 {
            return 0.0;
        }
        let secs = self.total_duration as f64 / 1e9;
        (self.eval_count as f64 / secs * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BackendError {
    #[error("Cannot reach inference server: {0}")]
    Connection(String),
    #[error("Inference server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response from inference server: {0}")]
    InvalidResponse(String),
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
    #[error("Inference task was interrupted: {0}")]
    Interrupted(String),
}

#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Names of the models available on the server.
    async fn get_models(&self, settings: &AppSettings) -> Result<Vec<String>, BackendError>;

    /// Run a single, non-streamed generation.
    async fn get_inference(
        &self,
        settings: &AppSettings,
        params: &ParamIteration,
    ) -> Result<InferenceResult, BackendError>;

    /// Server version string.
    async fn get_version(&self, settings: &AppSettings) -> Result<String, BackendError>;
}
