// src/backend/ollama.rs
// Ollama HTTP client used as the default inference backend

use super::{BackendError, InferenceBackend, InferenceResult};
use crate::db::settings::AppSettings;
use crate::grid::ParamIteration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ollama API options for one generation.
///
/// Sampling values come from the grid iteration; the remaining keys are
/// forwarded from the user's default options when present.
#[derive(Debug, Serialize, Default, PartialEq)]
struct OllamaOptions {
    temperature: f32,
    repeat_penalty: f32,
    top_k: u32,
    top_p: f32,
    repeat_last_n: i32,
    tfs_z: f32,
    mirostat: u8,
    mirostat_tau: f32,
    mirostat_eta: f32,
    seed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gqa: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_thread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl OllamaOptions {
    fn build(params: &ParamIteration, defaults: &BTreeMap<String, Value>) -> Self {
        Self {
            temperature: params.temperature,
            repeat_penalty: params.repeat_penalty,
            top_k: params.top_k,
            top_p: params.top_p,
            repeat_last_n: params.repeat_last_n,
            tfs_z: params.tfs_z,
            mirostat: params.mirostat,
            mirostat_tau: params.mirostat_tau,
            mirostat_eta: params.mirostat_eta,
            seed: params.seed(),
            num_ctx: default_int(defaults, "num_ctx"),
            num_gqa: default_int(defaults, "num_gqa"),
            num_gpu: default_int(defaults, "num_gpu"),
            num_thread: default_int(defaults, "num_thread"),
            num_predict: default_int(defaults, "num_predict"),
            stop: default_stop(defaults),
        }
    }
}

fn default_int<T: TryFrom<i64>>(defaults: &BTreeMap<String, Value>, key: &str) -> Option<T> {
    let value = defaults.get(key)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .and_then(|n| T::try_from(n).ok());

    if parsed.is_none() {
        warn!(option = key, value = %value, "Ignoring invalid default option");
    }
    parsed
}

fn default_stop(defaults: &BTreeMap<String, Value>) -> Vec<String> {
    match defaults.get("stop") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaVersionResponse {
    version: String,
}

/// Ollama-based inference backend
pub struct OllamaBackend {
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(settings: &AppSettings, path: &str) -> String {
        format!("{}{}", settings.server_url.trim_end_matches('/'), path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(timeout_secs)
    } else {
        BackendError::Connection(e.to_string())
    }
}

#[async_trait::async_trait]
impl InferenceBackend for OllamaBackend {
    async fn get_models(&self, settings: &AppSettings) -> Result<Vec<String>, BackendError> {
        let url = Self::endpoint(settings, "/api/tags");
        debug!(url = %url, "Fetching models");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(settings.request_timeout))
            .send()
            .await
            .map_err(|e| map_send_error(e, settings.request_timeout))?;
        let tags: OllamaTagsResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn get_inference(
        &self,
        settings: &AppSettings,
        params: &ParamIteration,
    ) -> Result<InferenceResult, BackendError> {
        let url = Self::endpoint(settings, "/api/generate");
        let req = OllamaRequest {
            model: &params.model,
            prompt: &params.prompt,
            system: &params.system_prompt,
            stream: false,
            options: OllamaOptions::build(params, &settings.default_options),
        };
        debug!(
            model = %params.model,
            prompt_len = params.prompt.len(),
            temperature = params.temperature,
            top_k = params.top_k,
            top_p = params.top_p,
            generation = params.generation_index,
            "Generating with Ollama"
        );

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(settings.request_timeout))
            .json(&req)
            .send()
            .await
            .map_err(|e| map_send_error(e, settings.request_timeout))?;
        let result: InferenceResult = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        info!(
            model = %params.model,
            response_len = result.response.len(),
            eval_count = result.eval_count,
            "Generation complete"
        );
        Ok(result)
    }

    async fn get_version(&self, settings: &AppSettings) -> Result<String, BackendError> {
        let url = Self::endpoint(settings, "/api/version");
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(settings.request_timeout))
            .send()
            .await
            .map_err(|e| map_send_error(e, settings.request_timeout))?;
        let body: OllamaVersionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.version)
    }
}
