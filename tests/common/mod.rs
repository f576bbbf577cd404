// tests/common/mod.rs
// Shared fixtures: a scripted inference backend and an in-memory app state

#![allow(dead_code)]

use async_trait::async_trait;
use grid_search::backend::{BackendError, InferenceBackend, InferenceResult};
use grid_search::db::schema_init::SchemaInitializer;
use grid_search::db::settings::AppSettings;
use grid_search::db::shared;
use grid_search::grid::{GridForm, ParamIteration, RawList};
use grid_search::AppState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers every request with its own parameters echoed back. Requests with
/// `top_k == fail_top_k` fail with a 500 from the "server".
pub struct FakeBackend {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail_top_k: Option<u32>,
    pub reachable: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_top_k: None,
            reachable: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn get_models(&self, _: &AppSettings) -> Result<Vec<String>, BackendError> {
        if !self.reachable {
            return Err(BackendError::Connection("connection refused".into()));
        }
        Ok(vec!["llama3:8b".into(), "phi3:mini".into()])
    }

    async fn get_inference(
        &self,
        _: &AppSettings,
        params: &ParamIteration,
    ) -> Result<InferenceResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_top_k == Some(params.top_k) {
            return Err(BackendError::Status {
                status: 500,
                body: "out of memory".into(),
            });
        }
        Ok(InferenceResult {
            response: format!(
                "{} t={} k={} g={}",
                params.model, params.temperature, params.top_k, params.generation_index
            ),
            created_at: "2024-05-01T10:00:00Z".into(),
            eval_count: 20,
            eval_duration: 500_000_000,
            prompt_eval_count: 5,
            prompt_eval_duration: 100_000_000,
            total_duration: 1_000_000_000,
        })
    }

    async fn get_version(&self, _: &AppSettings) -> Result<String, BackendError> {
        if !self.reachable {
            return Err(BackendError::Connection("connection refused".into()));
        }
        Ok("0.5.7".into())
    }
}

pub fn app_state(backend: Arc<FakeBackend>) -> Arc<AppState> {
    let conn = SchemaInitializer::open_in_memory().unwrap();
    Arc::new(AppState::new(shared(conn), backend, AppSettings::default()))
}

pub fn form(models: &[&str], temperature: &str, top_k: &str, generations: i64) -> GridForm {
    GridForm {
        models: models.iter().map(|m| m.to_string()).collect(),
        prompts: vec!["Why is the sky blue?".into()],
        generations,
        temperature_list: RawList::from(temperature),
        top_k_list: RawList::from(top_k),
        ..GridForm::default()
    }
}

/// Poll until the current experiment has nothing left running.
pub async fn wait_finished(state: &AppState) {
    for _ in 0..500 {
        if state.snapshot().map(|s| s.finished).unwrap_or(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("experiment did not finish in time");
}
