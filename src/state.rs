//! Application state shared by every HTTP worker.
//!
//! `AppState` is the single writer for the current experiment: a submission
//! cancels the previous run, purges its cache entries and marks the new
//! experiment active before its worker starts.

use crate::backend::{BackendError, InferenceBackend, InferenceResult, VERSION_UNAVAILABLE};
use crate::db::experiments::{ExperimentFile, ExperimentStore};
use crate::db::prompts::PromptStore;
use crate::db::settings::{self, AppSettings};
use crate::db::{SharedConnection, StoreError};
use crate::engine::{
    CacheStats, ExperimentHandle, ExperimentRun, ExperimentSnapshot, GateError,
    InferenceCache, IterationOutcome, Runner,
};
use crate::experiment_log::{decode, ExperimentLog, ParseError};
use crate::grid::{GridForm, ParamIteration, ValidationError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("No experiment has been submitted")]
    NoExperiment,
}

pub struct AppState {
    conn: SharedConnection,
    settings: RwLock<AppSettings>,
    runner: Runner,
    prompts: PromptStore,
    current: Mutex<Option<Arc<ExperimentHandle>>>,
}

impl AppState {
    pub fn new(
        conn: SharedConnection,
        backend: Arc<dyn InferenceBackend>,
        settings: AppSettings,
    ) -> Self {
        let runner = Runner::new(
            backend,
            Arc::new(InferenceCache::new()),
            ExperimentStore::new(conn.clone()),
        );
        Self {
            prompts: PromptStore::new(conn.clone()),
            conn,
            settings: RwLock::new(settings),
            runner,
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.read().clone()
    }

    /// Validate, persist and apply new settings. Running experiments keep the
    /// snapshot they were submitted with.
    pub fn save_settings(&self, new_settings: AppSettings) -> Result<AppSettings, StateError> {
        settings::save_settings(&self.conn.lock(), &new_settings)?;
        *self.settings.write() = new_settings.clone();
        info!(server_url = %new_settings.server_url, "Settings saved");
        Ok(new_settings)
    }

    pub fn experiments(&self) -> &ExperimentStore {
        self.runner.store()
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.runner.cache().stats()
    }

    /// Cheap liveness probe of the database.
    pub fn database_ok(&self) -> bool {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    /// Start a new experiment from the form. Nothing changes if validation
    /// fails.
    pub fn submit(&self, form: &GridForm) -> Result<ExperimentSnapshot, StateError> {
        let mut grid = form.validate()?;
        let settings = self.settings();
        if grid.system_prompt.trim().is_empty() {
            grid.system_prompt = settings.system_prompt.clone();
        }

        let experiment_uuid = Uuid::new_v4().to_string();
        let cache = self.runner.cache();

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            previous.cancel();
            let purged = cache.clear(&previous.experiment_uuid());
            info!(
                experiment_uuid = %previous.experiment_uuid(),
                purged,
                "Superseded previous experiment"
            );
        }
        cache.set_active(&experiment_uuid);

        let handle = ExperimentHandle::new(ExperimentRun::new(
            experiment_uuid.clone(),
            settings,
            grid,
        ));
        *current = Some(handle.clone());
        drop(current);

        info!(
            experiment_uuid = %experiment_uuid,
            iterations = handle.len(),
            "Experiment submitted"
        );
        self.runner.spawn(handle.clone());
        Ok(handle.snapshot())
    }

    fn current(&self) -> Result<Arc<ExperimentHandle>, StateError> {
        self.current.lock().clone().ok_or(StateError::NoExperiment)
    }

    pub fn snapshot(&self) -> Option<ExperimentSnapshot> {
        self.current.lock().as_ref().map(|h| h.snapshot())
    }

    pub fn current_log(&self) -> Result<ExperimentLog, StateError> {
        Ok(self.current()?.log())
    }

    pub fn cancel(&self) -> Result<ExperimentSnapshot, StateError> {
        let handle = self.current()?;
        handle.cancel();
        info!(experiment_uuid = %handle.experiment_uuid(), "Experiment cancelled");
        Ok(handle.snapshot())
    }

    pub async fn refetch(&self, index: usize) -> Result<IterationOutcome, StateError> {
        let handle = self.current()?;
        Ok(self.runner.refetch(&handle, index).await?)
    }

    /// Rebuild a grid form from a stored log. The form is returned for the
    /// client to edit and submit; the current experiment is left alone.
    pub fn clone_experiment(&self, contents: &str) -> Result<GridForm, StateError> {
        let grid = decode(contents)?;
        Ok(GridForm::from(&grid))
    }

    /// Delete stored experiments. Deleting the running experiment's log does
    /// not stop it.
    pub fn delete_experiments(&self, uuid: &str) -> Result<usize, StateError> {
        Ok(self.experiments().delete(uuid)?)
    }

    pub fn list_experiments(&self) -> Result<Vec<ExperimentFile>, StateError> {
        Ok(self.experiments().list()?)
    }

    pub async fn models(&self) -> Result<Vec<String>, StateError> {
        let settings = self.settings();
        Ok(self.runner.backend().get_models(&settings).await?)
    }

    /// Server version, or a placeholder when the server cannot be reached.
    pub async fn version(&self) -> String {
        let settings = self.settings();
        match self.runner.backend().get_version(&settings).await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "Version probe failed");
                VERSION_UNAVAILABLE.to_string()
            }
        }
    }

    /// One inference outside the grid, with the current settings.
    pub async fn inference(&self, params: &ParamIteration) -> Result<InferenceResult, StateError> {
        let settings = self.settings();
        Ok(self.runner.infer_once(&settings, params).await?)
    }
}
