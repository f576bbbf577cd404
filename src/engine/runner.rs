//! The experiment worker.
//!
//! One [`ExperimentHandle`] exists per submitted experiment and owns its run
//! record together with its [`SequentialGate`]. [`Runner::run_experiment`] is
//! the single worker for a handle: it takes the next enabled iteration, sends
//! it through the [`InferenceCache`] and records the outcome, which opens the
//! next gate. Requests are never issued concurrently within one experiment.

use super::cache::{CacheKey, FetchOutcome, InferenceCache};
use super::gate::{GateError, IterationState, SequentialGate};
use super::run::{ExperimentRun, IterationOutcome, IterationRecord};
use crate::backend::{BackendError, InferenceBackend, InferenceResult};
use crate::db::experiments::ExperimentStore;
use crate::db::settings::AppSettings;
use crate::experiment_log::{encode, ExperimentLog};
use crate::grid::{GridParameters, ParamIteration};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Progress view of an experiment, as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSnapshot {
    pub experiment_uuid: String,
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub cancelled: bool,
    pub finished: bool,
    pub grid: GridParameters,
    pub iterations: Vec<IterationView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationView {
    pub index: usize,
    pub state: IterationState,
    #[serde(flatten)]
    pub record: IterationRecord,
}

struct HandleState {
    run: ExperimentRun,
    gate: SequentialGate,
}

enum Next {
    Run(usize, ParamIteration),
    Wait,
    Done,
}

pub struct ExperimentHandle {
    state: Mutex<HandleState>,
    wake: Notify,
}

impl ExperimentHandle {
    pub fn new(run: ExperimentRun) -> Arc<Self> {
        let gate = SequentialGate::new(run.len());
        Arc::new(Self {
            state: Mutex::new(HandleState { run, gate }),
            wake: Notify::new(),
        })
    }

    pub fn experiment_uuid(&self) -> String {
        self.state.lock().run.experiment_uuid.clone()
    }

    pub fn settings(&self) -> AppSettings {
        self.state.lock().run.settings.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().run.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iteration_state(&self, index: usize) -> Option<IterationState> {
        self.state.lock().gate.state(index)
    }

    pub fn outcome(&self, index: usize) -> Option<IterationOutcome> {
        self.state
            .lock()
            .run
            .iterations
            .get(index)
            .map(|r| r.outcome.clone())
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().gate.completed_count()
    }

    /// True once the worker has nothing left to start.
    pub fn is_finished(&self) -> bool {
        self.state.lock().gate.is_finished()
    }

    /// Soft cancel. A request already in flight runs to completion.
    pub fn cancel(&self) {
        self.state.lock().gate.cancel();
        self.wake.notify_one();
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        let state = self.state.lock();
        let iterations = state
            .run
            .iterations
            .iter()
            .enumerate()
            .map(|(index, record)| IterationView {
                index,
                state: state.gate.state(index).unwrap_or(IterationState::Idle),
                record: record.clone(),
            })
            .collect();

        ExperimentSnapshot {
            experiment_uuid: state.run.experiment_uuid.clone(),
            created_at: state.run.created_at,
            total: state.run.len(),
            completed: state.gate.completed_count(),
            cancelled: state.gate.is_cancelled(),
            finished: state.gate.is_finished() && !state.gate.is_fetching(),
            grid: state.run.grid.clone(),
            iterations,
        }
    }

    /// Log document of the completed iterations so far.
    pub fn log(&self) -> ExperimentLog {
        encode(&self.state.lock().run)
    }

    fn take_next(&self) -> Next {
        let mut state = self.state.lock();
        if state.gate.is_finished() {
            return Next::Done;
        }
        let Some(index) = state.gate.next_enabled() else {
            return Next::Wait;
        };
        let Some(params) = state.run.params(index).cloned() else {
            return Next::Done;
        };
        match state.gate.begin(index) {
            Ok(()) => Next::Run(index, params),
            Err(e) => {
                warn!(error = %e, "Gate refused to start iteration");
                Next::Wait
            }
        }
    }

    fn reopen(&self, index: usize) -> Result<ParamIteration, GateError> {
        let mut state = self.state.lock();
        let params = state
            .run
            .params(index)
            .cloned()
            .ok_or(GateError::OutOfBounds(index))?;
        state.gate.reopen(index)?;
        state.run.record(index, IterationOutcome::Pending);
        Ok(params)
    }

    fn record(&self, index: usize, outcome: &FetchOutcome) -> IterationOutcome {
        let recorded = match outcome {
            Ok(result) => IterationOutcome::Completed {
                result: result.clone(),
            },
            Err(e) => IterationOutcome::Failed {
                error: e.to_string(),
            },
        };

        {
            let mut state = self.state.lock();
            state.run.record(index, recorded.clone());
            if let Err(e) = state.gate.finish(index, outcome.is_ok()) {
                warn!(index, error = %e, "Iteration finished outside the gate");
            }
        }
        self.wake.notify_one();
        recorded
    }
}

/// Shared services an experiment worker needs. Cheap to clone.
#[derive(Clone)]
pub struct Runner {
    backend: Arc<dyn InferenceBackend>,
    cache: Arc<InferenceCache>,
    store: ExperimentStore,
}

impl Runner {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        cache: Arc<InferenceCache>,
        store: ExperimentStore,
    ) -> Self {
        Self {
            backend,
            cache,
            store,
        }
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<InferenceCache> {
        &self.cache
    }

    pub fn store(&self) -> &ExperimentStore {
        &self.store
    }

    /// Run the worker for `handle` on the tokio runtime.
    pub fn spawn(&self, handle: Arc<ExperimentHandle>) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_experiment(handle).await })
    }

    /// Drive every iteration of the experiment in order. Returns once all of
    /// them are done or the experiment was cancelled.
    pub async fn run_experiment(&self, handle: Arc<ExperimentHandle>) {
        let experiment_uuid = handle.experiment_uuid();
        info!(
            experiment_uuid = %experiment_uuid,
            iterations = handle.len(),
            "Experiment started"
        );

        loop {
            match handle.take_next() {
                Next::Run(index, params) => {
                    self.execute(&handle, index, params).await;
                }
                Next::Wait => handle.wake.notified().await,
                Next::Done => break,
            }
        }

        info!(
            experiment_uuid = %experiment_uuid,
            completed = handle.completed_count(),
            total = handle.len(),
            "Experiment finished"
        );
    }

    /// Fetch one iteration again, bypassing the cached outcome. Other
    /// iterations are not touched.
    pub async fn refetch(
        &self,
        handle: &Arc<ExperimentHandle>,
        index: usize,
    ) -> Result<IterationOutcome, GateError> {
        let params = handle.reopen(index)?;
        self.cache.invalidate(&CacheKey::from(params.clone()));
        info!(
            experiment_uuid = %params.experiment_uuid,
            index,
            "Refetching iteration"
        );

        // The reopened index must be closed even if the caller goes away, so
        // the fetch runs on its own task.
        let runner = self.clone();
        let task_handle = Arc::clone(handle);
        let task =
            tokio::spawn(async move { runner.execute(&task_handle, index, params).await });
        match task.await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(index, error = %e, "Refetch task did not complete");
                Ok(handle.record(index, &Err(BackendError::Interrupted(e.to_string()))))
            }
        }
    }

    async fn execute(
        &self,
        handle: &Arc<ExperimentHandle>,
        index: usize,
        params: ParamIteration,
    ) -> IterationOutcome {
        let settings = handle.settings();
        debug!(
            experiment_uuid = %params.experiment_uuid,
            index,
            model = %params.model,
            "Fetching inference"
        );

        let outcome = self.fetch(&settings, &params).await;
        match &outcome {
            Ok(result) => {
                info!(
                    experiment_uuid = %params.experiment_uuid,
                    index,
                    eval_count = result.eval_count,
                    tokens_per_second = result.tokens_per_second(),
                    "Inference completed"
                );
                self.persist(&settings, &params, result);
            }
            Err(e) => {
                warn!(
                    experiment_uuid = %params.experiment_uuid,
                    index,
                    error = %e,
                    "Inference failed"
                );
            }
        }

        handle.record(index, &outcome)
    }

    /// One inference outside any experiment. Not cached; logged on success.
    pub async fn infer_once(
        &self,
        settings: &AppSettings,
        params: &ParamIteration,
    ) -> FetchOutcome {
        let outcome = timed_inference(self.backend.as_ref(), settings, params).await;
        if let Ok(result) = &outcome {
            if let Err(e) = self.store.log_inference(settings, params, result) {
                error!(
                    experiment_uuid = %params.experiment_uuid,
                    error = %e,
                    "Failed to log inference"
                );
            }
        }
        outcome
    }

    async fn fetch(&self, settings: &AppSettings, params: &ParamIteration) -> FetchOutcome {
        let backend = Arc::clone(&self.backend);
        let settings = settings.clone();
        let request = params.clone();

        self.cache
            .get_or_fetch(CacheKey::from(params.clone()), move || async move {
                timed_inference(backend.as_ref(), &settings, &request).await
            })
            .await
    }

    fn persist(&self, settings: &AppSettings, params: &ParamIteration, result: &InferenceResult) {
        if !self.cache.is_active(&params.experiment_uuid) {
            debug!(
                experiment_uuid = %params.experiment_uuid,
                "Not logging result of superseded experiment"
            );
            return;
        }
        if let Err(e) = self.store.log_inference(settings, params, result) {
            error!(
                experiment_uuid = %params.experiment_uuid,
                error = %e,
                "Failed to log inference"
            );
        }
    }
}

async fn timed_inference(
    backend: &dyn InferenceBackend,
    settings: &AppSettings,
    params: &ParamIteration,
) -> FetchOutcome {
    let secs = settings.request_timeout;
    match tokio::time::timeout(
        Duration::from_secs(secs),
        backend.get_inference(settings, params),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(BackendError::Timeout(secs)),
    }
}
