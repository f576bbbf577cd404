//! Experiment log codec.
//!
//! The JSON layout below is what gets persisted for every experiment and must
//! stay readable by [`decode`] across versions:
//!
//! ```json
//! {
//!   "experiment_uuid": "...",
//!   "datetime": "2024-05-01T10:00:00+00:00",
//!   "config": { "server_url": "...", "request_timeout": 300,
//!               "system_prompt": "", "default_options": { } },
//!   "inferences": [ { "parameters": { }, "result": { } } ]
//! }
//! ```
//!
//! Decoding ("clone experiment") is an approximation: floats are grouped at
//! two decimals and the generation count is inferred from the totals.

use crate::backend::InferenceResult;
use crate::db::settings::AppSettings;
use crate::engine::run::{ExperimentRun, IterationOutcome};
use crate::grid::{GridParameters, ParamIteration};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid experiment log: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Experiment log has no inferences")]
    NoInferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub experiment_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    pub config: LoggedConfig,
    pub inferences: Vec<LoggedInference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedConfig {
    pub server_url: String,
    pub request_timeout: u64,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub default_options: BTreeMap<String, Value>,
}

impl From<&AppSettings> for LoggedConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            request_timeout: settings.request_timeout,
            system_prompt: settings.system_prompt.clone(),
            default_options: settings.default_options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedInference {
    pub parameters: LoggedParameters,
    pub result: InferenceResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedParameters {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: String,
    pub temperature: f32,
    pub repeat_penalty: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_last_n: i32,
    pub tfs_z: f32,
    pub mirostat: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
}

impl From<&ParamIteration> for LoggedParameters {
    fn from(p: &ParamIteration) -> Self {
        Self {
            model: p.model.clone(),
            prompt: p.prompt.clone(),
            system_prompt: p.system_prompt.clone(),
            temperature: p.temperature,
            repeat_penalty: p.repeat_penalty,
            top_k: p.top_k,
            top_p: p.top_p,
            repeat_last_n: p.repeat_last_n,
            tfs_z: p.tfs_z,
            mirostat: p.mirostat,
            mirostat_tau: p.mirostat_tau,
            mirostat_eta: p.mirostat_eta,
            seed: Some(p.seed()),
        }
    }
}

impl ExperimentLog {
    pub fn new(experiment_uuid: &str, settings: &AppSettings) -> Self {
        Self {
            experiment_uuid: experiment_uuid.to_string(),
            datetime: Some(chrono::Utc::now().to_rfc3339()),
            config: LoggedConfig::from(settings),
            inferences: Vec::new(),
        }
    }

    pub fn push(&mut self, params: &ParamIteration, result: &InferenceResult) {
        self.inferences.push(LoggedInference {
            parameters: LoggedParameters::from(params),
            result: result.clone(),
        });
    }

    pub fn to_json_string(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(doc: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(doc)?)
    }
}

/// Log document for a run. Only completed iterations are written.
pub fn encode(run: &ExperimentRun) -> ExperimentLog {
    let mut log = ExperimentLog {
        experiment_uuid: run.experiment_uuid.clone(),
        datetime: Some(run.created_at.to_rfc3339()),
        config: LoggedConfig::from(&run.settings),
        inferences: Vec::new(),
    };
    for record in &run.iterations {
        if let IterationOutcome::Completed { result } = &record.outcome {
            log.push(&record.params, result);
        }
    }
    log
}

fn round2(v: f32) -> f32 {
    ((v as f64 * 100.0).round() / 100.0) as f32
}

fn hundredths(v: f32) -> i64 {
    (v as f64 * 100.0).round() as i64
}

#[derive(PartialEq, Eq, Hash)]
struct Signature {
    temperature: i64,
    repeat_penalty: i64,
    top_k: u32,
    top_p: i64,
    repeat_last_n: i32,
    tfs_z: i64,
    mirostat: u8,
    mirostat_tau: i64,
    mirostat_eta: i64,
}

impl From<&LoggedParameters> for Signature {
    fn from(p: &LoggedParameters) -> Self {
        Self {
            temperature: hundredths(p.temperature),
            repeat_penalty: hundredths(p.repeat_penalty),
            top_k: p.top_k,
            top_p: hundredths(p.top_p),
            repeat_last_n: p.repeat_last_n,
            tfs_z: hundredths(p.tfs_z),
            mirostat: p.mirostat,
            mirostat_tau: hundredths(p.mirostat_tau),
            mirostat_eta: hundredths(p.mirostat_eta),
        }
    }
}

fn push_distinct<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Rebuild grid parameters from a stored log. Parsing happens before anything
/// is returned, so a failure leaves the caller's state untouched.
pub fn decode(doc: &str) -> Result<GridParameters, ParseError> {
    let log = ExperimentLog::from_json_str(doc)?;
    decode_log(&log)
}

pub fn decode_log(log: &ExperimentLog) -> Result<GridParameters, ParseError> {
    let first = log.inferences.first().ok_or(ParseError::NoInferences)?;
    let system_prompt = if first.parameters.system_prompt.is_empty() {
        log.config.system_prompt.clone()
    } else {
        first.parameters.system_prompt.clone()
    };

    let mut grid = GridParameters {
        models: Vec::new(),
        prompts: Vec::new(),
        system_prompt,
        generations: 1,
        temperature: Vec::new(),
        repeat_penalty: Vec::new(),
        top_k: Vec::new(),
        top_p: Vec::new(),
        repeat_last_n: Vec::new(),
        tfs_z: Vec::new(),
        mirostat: Vec::new(),
        mirostat_tau: Vec::new(),
        mirostat_eta: Vec::new(),
    };
    let mut signatures = HashSet::new();

    for inference in &log.inferences {
        let p = &inference.parameters;
        push_distinct(&mut grid.models, p.model.clone());
        push_distinct(&mut grid.prompts, p.prompt.clone());

        if signatures.insert(Signature::from(p)) {
            push_distinct(&mut grid.temperature, round2(p.temperature));
            push_distinct(&mut grid.repeat_penalty, round2(p.repeat_penalty));
            push_distinct(&mut grid.top_k, p.top_k);
            push_distinct(&mut grid.top_p, round2(p.top_p));
            push_distinct(&mut grid.repeat_last_n, p.repeat_last_n);
            push_distinct(&mut grid.tfs_z, round2(p.tfs_z));
            push_distinct(&mut grid.mirostat, p.mirostat);
            push_distinct(&mut grid.mirostat_tau, round2(p.mirostat_tau));
            push_distinct(&mut grid.mirostat_eta, round2(p.mirostat_eta));
        }
    }

    let combinations = signatures.len() * grid.models.len() * grid.prompts.len();
    let generations = log.inferences.len() / combinations;
    grid.generations = u32::try_from(generations).unwrap_or(u32::MAX).max(1);

    debug!(
        experiment_uuid = %log.experiment_uuid,
        inferences = log.inferences.len(),
        signatures = signatures.len(),
        generations = grid.generations,
        "Decoded experiment log"
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(text: &str) -> InferenceResult {
        InferenceResult {
            response: text.to_string(),
            created_at: "2024-05-01T10:00:00Z".to_string(),
            eval_count: 10,
            eval_duration: 1,
            prompt_eval_count: 5,
            prompt_eval_duration: 1,
            total_duration: 2,
        }
    }

    fn params(model: &str, temperature: f32) -> LoggedParameters {
        LoggedParameters {
            model: model.to_string(),
            prompt: "p".to_string(),
            system_prompt: String::new(),
            temperature,
            repeat_penalty: 1.1,
            top_k: 40,
            top_p: 0.9,
            repeat_last_n: 64,
            tfs_z: 1.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            seed: Some(0),
        }
    }

    fn log_with(params: Vec<LoggedParameters>) -> ExperimentLog {
        ExperimentLog {
            experiment_uuid: "exp".to_string(),
            datetime: None,
            config: LoggedConfig::from(&AppSettings::default()),
            inferences: params
                .into_iter()
                .map(|parameters| LoggedInference {
                    parameters,
                    result: result("ok"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_floats_grouped_at_two_decimals() {
        let log = log_with(vec![params("a", 0.701), params("a", 0.699), params("a", 0.9)]);
        let grid = decode_log(&log).unwrap();
        assert_eq!(grid.temperature, vec![0.7, 0.9]);
        // 3 inferences over 2 signatures floors to 1 generation
        assert_eq!(grid.generations, 1);
    }

    #[test]
    fn test_generations_recovered() {
        let mut entries = Vec::new();
        for model in ["a", "b"] {
            for _ in 0..3 {
                entries.push(params(model, 0.5));
            }
        }
        let grid = decode_log(&log_with(entries)).unwrap();
        assert_eq!(grid.models, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(grid.generations, 3);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(decode("{not json"), Err(ParseError::Json(_))));
        assert!(matches!(
            decode(r#"{"experiment_uuid": "x", "inferences": []}"#),
            Err(ParseError::Json(_))
        ));

        let empty = serde_json::to_string(&log_with(vec![])).unwrap();
        assert!(matches!(decode(&empty), Err(ParseError::NoInferences)));
    }

    #[test]
    fn test_reads_logs_with_extra_fields() {
        let doc = json!({
            "experiment_uuid": "legacy",
            "datetime": "2024-03-02 10:11:12 UTC",
            "config": {
                "server_url": "http://localhost:11434/",
                "request_timeout": 300,
                "system_prompt": "Be brief.",
                "concurrent_inferences": 1,
                "hide_model_names": false,
                "default_options": {"num_ctx": 4096}
            },
            "inferences": [{
                "parameters": {
                    "experiment_uuid": "legacy", "model": "phi", "prompt": "hi",
                    "system_prompt": "", "temperature": 0.7, "repeat_penalty": 1.1,
                    "top_k": 40, "top_p": 0.9, "repeat_last_n": 64, "tfs_z": 1,
                    "mirostat": 0, "mirostat_tau": 5, "mirostat_eta": 0.1,
                    "generation": 0, "seed": 0
                },
                "result": {
                    "model": "phi", "created_at": "2024-03-02T10:11:12Z",
                    "response": "hello", "done": true, "context": [1],
                    "total_duration": 10, "prompt_eval_count": 1,
                    "prompt_eval_duration": 1, "eval_count": 1, "eval_duration": 1
                }
            }]
        });
        let grid = decode(&doc.to_string()).unwrap();
        assert_eq!(grid.system_prompt, "Be brief.");
        assert_eq!(grid.models, vec!["phi".to_string()]);
        assert_eq!(grid.tfs_z, vec![1.0]);
    }

    #[test]
    fn test_json_string_round_trip() {
        let log = log_with(vec![params("a", 0.3)]);
        let text = log.to_json_string().unwrap();
        assert_eq!(ExperimentLog::from_json_str(&text).unwrap(), log);
    }
}
