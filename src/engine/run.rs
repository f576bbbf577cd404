//! In-memory record of one submitted experiment.

use crate::backend::InferenceResult;
use crate::db::settings::AppSettings;
use crate::grid::{enumerate, GridParameters, ParamIteration};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IterationOutcome {
    Pending,
    Completed { result: InferenceResult },
    Failed { error: String },
}

impl IterationOutcome {
    pub fn is_done(&self) -> bool {
        !matches!(self, IterationOutcome::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub params: ParamIteration,
    #[serde(flatten)]
    pub outcome: IterationOutcome,
}

/// One grid search submission. Owns its iteration sequence; results are
/// written in as responses arrive.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRun {
    pub experiment_uuid: String,
    pub created_at: DateTime<Utc>,
    pub settings: AppSettings,
    pub grid: GridParameters,
    pub iterations: Vec<IterationRecord>,
}

impl ExperimentRun {
    pub fn new(experiment_uuid: String, settings: AppSettings, grid: GridParameters) -> Self {
        let iterations = enumerate(&grid, &experiment_uuid)
            .into_iter()
            .map(|params| IterationRecord {
                params,
                outcome: IterationOutcome::Pending,
            })
            .collect();

        Self {
            experiment_uuid,
            created_at: Utc::now(),
            settings,
            grid,
            iterations,
        }
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn params(&self, index: usize) -> Option<&ParamIteration> {
        self.iterations.get(index).map(|r| &r.params)
    }

    pub fn record(&mut self, index: usize, outcome: IterationOutcome) {
        if let Some(record) = self.iterations.get_mut(index) {
            record.outcome = outcome;
        }
    }
}
