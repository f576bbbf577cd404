//! Grid enumeration: expands the validated parameter lists into the ordered
//! sequence of concrete inference requests.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Validated grid input. Every list holds at least one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParameters {
    pub models: Vec<String>,
    pub prompts: Vec<String>,
    pub system_prompt: String,
    pub generations: u32,
    pub temperature: Vec<f32>,
    pub repeat_penalty: Vec<f32>,
    pub top_k: Vec<u32>,
    pub top_p: Vec<f32>,
    pub repeat_last_n: Vec<i32>,
    pub tfs_z: Vec<f32>,
    pub mirostat: Vec<u8>,
    pub mirostat_tau: Vec<f32>,
    pub mirostat_eta: Vec<f32>,
}

/// Upper bound on the iterations one experiment may expand to.
pub const MAX_ITERATIONS: usize = 100_000;

impl GridParameters {
    /// Number of iterations `enumerate` will produce, without building them.
    /// `None` when the product does not fit in a `usize`.
    pub fn checked_iteration_count(&self) -> Option<usize> {
        [
            self.models.len(),
            self.prompts.len(),
            self.temperature.len(),
            self.repeat_penalty.len(),
            self.top_k.len(),
            self.top_p.len(),
            self.repeat_last_n.len(),
            self.tfs_z.len(),
            self.mirostat.len(),
            self.mirostat_tau.len(),
            self.mirostat_eta.len(),
            self.generations as usize,
        ]
        .iter()
        .try_fold(1usize, |total, &n| total.checked_mul(n))
    }

    /// Saturates at `usize::MAX`.
    pub fn iteration_count(&self) -> usize {
        self.checked_iteration_count().unwrap_or(usize::MAX)
    }
}

/// One concrete parameter tuple. Equality and hashing are structural, floats
/// are compared by bit pattern so the type can key a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamIteration {
    #[serde(default)]
    pub experiment_uuid: String,
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
    #[serde(default)]
    pub generation_index: u32,
}

impl ParamIteration {
    /// Seed sent to the backend. Repeated generations of one tuple get
    /// distinct seeds so they differ when temperature > 0.
    pub fn seed(&self) -> i32 {
        self.generation_index as i32
    }

    fn float_bits(&self) -> [u32; 6] {
        [
            self.temperature.to_bits(),
            self.repeat_penalty.to_bits(),
            self.top_p.to_bits(),
            self.tfs_z.to_bits(),
            self.mirostat_tau.to_bits(),
            self.mirostat_eta.to_bits(),
        ]
    }
}

impl PartialEq for ParamIteration {
    fn eq(&self, other: &Self) -> bool {
        self.experiment_uuid == other.experiment_uuid
            && self.model == other.model
            && self.prompt == other.prompt
            && self.system_prompt == other.system_prompt
            && self.top_k == other.top_k
            && self.repeat_last_n == other.repeat_last_n
            && self.mirostat == other.mirostat
            && self.generation_index == other.generation_index
            && self.float_bits() == other.float_bits()
    }
}

impl Eq for ParamIteration {}

impl Hash for ParamIteration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.experiment_uuid.hash(state);
        self.model.hash(state);
        self.prompt.hash(state);
        self.system_prompt.hash(state);
        self.top_k.hash(state);
        self.repeat_last_n.hash(state);
        self.mirostat.hash(state);
        self.generation_index.hash(state);
        self.float_bits().hash(state);
    }
}

/// Cartesian product of the grid, models varying slowest and generations
/// fastest. Iteration numbering in progress output relies on this order.
pub fn enumerate(params: &GridParameters, experiment_uuid: &str) -> Vec<ParamIteration> {
    let capacity = params.iteration_count().min(MAX_ITERATIONS);
    let mut iterations = Vec::with_capacity(capacity);

    for model in &params.models {
        for prompt in &params.prompts {
            for &temperature in &params.temperature {
                for &repeat_penalty in &params.repeat_penalty {
                    for &top_k in &params.top_k {
                        for &top_p in &params.top_p {
                            for &repeat_last_n in &params.repeat_last_n {
                                for &tfs_z in &params.tfs_z {
                                    for &mirostat in &params.mirostat {
                                        for &mirostat_tau in &params.mirostat_tau {
                                            for &mirostat_eta in &params.mirostat_eta {
                                                for generation_index in 0..params.generations {
                                                    iterations.push(ParamIteration {
                                                        experiment_uuid: experiment_uuid
                                                            .to_string(),
                                                        model: model.clone(),
                                                        prompt: prompt.clone(),
                                                        system_prompt: params
                                                            .system_prompt
                                                            .clone(),
                                                        temperature,
                                                        repeat_penalty,
                                                        top_k,
                                                        top_p,
                                                        repeat_last_n,
                                                        tfs_z,
                                                        mirostat,
                                                        mirostat_tau,
                                                        mirostat_eta,
                                                        generation_index,
                                                    });
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    iterations
}
