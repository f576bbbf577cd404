// src/engine/mod.rs
// Experiment execution: sequential gate, inference cache and the worker

pub mod cache;
pub mod gate;
pub mod run;
pub mod runner;

pub use cache::{CacheKey, CacheStats, InferenceCache};
pub use gate::{GateError, IterationState, SequentialGate};
pub use run::{ExperimentRun, IterationOutcome, IterationRecord};
pub use runner::{ExperimentHandle, ExperimentSnapshot, Runner};
