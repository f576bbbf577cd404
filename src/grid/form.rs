//! The grid form as submitted by a client, and its validation into
//! [`GridParameters`].

use super::enumerate::{GridParameters, MAX_ITERATIONS};
use super::params::{parse_f32_list, parse_int_list, RawList, ValidationError};
use serde::{Deserialize, Serialize};

/// Missing fields take the values of [`GridForm::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridForm {
    pub models: Vec<String>,
    pub prompts: Vec<String>,
    pub system_prompt: String,
    pub generations: i64,
    pub temperature_list: RawList,
    pub repeat_penalty_list: RawList,
    pub top_k_list: RawList,
    pub top_p_list: RawList,
    pub repeat_last_n_list: RawList,
    pub tfs_z_list: RawList,
    pub mirostat_list: RawList,
    pub mirostat_tau_list: RawList,
    pub mirostat_eta_list: RawList,
}

impl Default for GridForm {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            prompts: Vec::new(),
            system_prompt: String::new(),
            generations: 1,
            temperature_list: RawList::Number(0.7),
            repeat_penalty_list: RawList::Number(1.1),
            top_k_list: RawList::Number(40.0),
            top_p_list: RawList::Number(0.9),
            repeat_last_n_list: RawList::Number(64.0),
            tfs_z_list: RawList::Number(1.0),
            mirostat_list: RawList::Number(0.0),
            mirostat_tau_list: RawList::Number(5.0),
            mirostat_eta_list: RawList::Number(0.1),
        }
    }
}

impl GridForm {
    /// Validate every field. The first failure is returned and nothing is
    /// submitted.
    pub fn validate(&self) -> Result<GridParameters, ValidationError> {
        if self.models.is_empty() {
            return Err(ValidationError::NoModels);
        }
        if let Some(index) = self.models.iter().position(|m| m.trim().is_empty()) {
            return Err(ValidationError::EmptyModel { index });
        }
        if self.prompts.is_empty() {
            return Err(ValidationError::NoPrompts);
        }
        if let Some(index) = self.prompts.iter().position(|p| p.trim().is_empty()) {
            return Err(ValidationError::EmptyPrompt { index });
        }
        let generations = u32::try_from(self.generations)
            .ok()
            .filter(|g| *g >= 1)
            .ok_or(ValidationError::InvalidGenerations {
                value: self.generations,
            })?;

        let params = GridParameters {
            models: self.models.clone(),
            prompts: self.prompts.clone(),
            system_prompt: self.system_prompt.clone(),
            generations,
            temperature: parse_f32_list("temperature", &self.temperature_list)?,
            repeat_penalty: parse_f32_list("repeat_penalty", &self.repeat_penalty_list)?,
            top_k: parse_int_list("top_k", &self.top_k_list)?,
            top_p: parse_f32_list("top_p", &self.top_p_list)?,
            repeat_last_n: parse_int_list("repeat_last_n", &self.repeat_last_n_list)?,
            tfs_z: parse_f32_list("tfs_z", &self.tfs_z_list)?,
            mirostat: parse_int_list("mirostat", &self.mirostat_list)?,
            mirostat_tau: parse_f32_list("mirostat_tau", &self.mirostat_tau_list)?,
            mirostat_eta: parse_f32_list("mirostat_eta", &self.mirostat_eta_list)?,
        };

        match params.checked_iteration_count() {
            Some(total) if total <= MAX_ITERATIONS => Ok(params),
            total => Err(ValidationError::TooManyIterations {
                total,
                max: MAX_ITERATIONS,
            }),
        }
    }
}

fn join<T: std::fmt::Display>(values: &[T]) -> RawList {
    let text = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    RawList::Text(text)
}

impl From<&GridParameters> for GridForm {
    fn from(params: &GridParameters) -> Self {
        Self {
            models: params.models.clone(),
            prompts: params.prompts.clone(),
            system_prompt: params.system_prompt.clone(),
            generations: params.generations as i64,
            temperature_list: join(&params.temperature),
            repeat_penalty_list: join(&params.repeat_penalty),
            top_k_list: join(&params.top_k),
            top_p_list: join(&params.top_p),
            repeat_last_n_list: join(&params.repeat_last_n),
            tfs_z_list: join(&params.tfs_z),
            mirostat_list: join(&params.mirostat),
            mirostat_tau_list: join(&params.mirostat_tau),
            mirostat_eta_list: join(&params.mirostat_eta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> GridForm {
        GridForm {
            models: vec!["llama3:8b".to_string()],
            prompts: vec!["Why is the sky blue?".to_string()],
            ..GridForm::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let params = form().validate().unwrap();
        assert_eq!(params.iteration_count(), 1);
        assert_eq!(params.top_k, vec![40]);
        assert_eq!(params.mirostat, vec![0]);
    }

    #[test]
    fn test_malformed_int_list_blocks_submission() {
        let mut f = form();
        f.top_k_list = "abc".into();
        match f.validate() {
            Err(ValidationError::MalformedList { field, .. }) => assert_eq!(field, "top_k"),
            other => panic!("expected MalformedList, got {:?}", other),
        }
    }

    #[test]
    fn test_required_fields() {
        let mut f = form();
        f.models.clear();
        assert_eq!(f.validate().unwrap_err(), ValidationError::NoModels);

        let mut f = form();
        f.models = vec!["llama3:8b".into(), "".into()];
        assert_eq!(f.validate().unwrap_err(), ValidationError::EmptyModel { index: 1 });

        let mut f = form();
        f.prompts = vec!["ok".into(), "  ".into()];
        assert_eq!(f.validate().unwrap_err(), ValidationError::EmptyPrompt { index: 1 });

        let mut f = form();
        f.generations = 0;
        assert_eq!(
            f.validate().unwrap_err(),
            ValidationError::InvalidGenerations { value: 0 }
        );
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let mut f = form();
        f.generations = i64::from(u32::MAX);
        assert_eq!(
            f.validate().unwrap_err(),
            ValidationError::TooManyIterations {
                total: Some(u32::MAX as usize),
                max: MAX_ITERATIONS,
            }
        );

        let mut f = form();
        f.top_k_list = "10, 20".into();
        f.generations = (MAX_ITERATIONS / 2) as i64;
        assert_eq!(f.validate().unwrap().iteration_count(), MAX_ITERATIONS);
        f.generations += 1;
        assert!(matches!(
            f.validate(),
            Err(ValidationError::TooManyIterations { .. })
        ));
    }

    #[test]
    fn test_overflowing_grid_rejected() {
        let sixty = (1..=60).map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
        let mut f = form();
        f.temperature_list = RawList::Text(sixty.clone());
        f.repeat_penalty_list = RawList::Text(sixty.clone());
        f.top_k_list = RawList::Text(sixty.clone());
        f.top_p_list = RawList::Text(sixty.clone());
        f.repeat_last_n_list = RawList::Text(sixty.clone());
        f.tfs_z_list = RawList::Text(sixty.clone());
        f.mirostat_tau_list = RawList::Text(sixty.clone());
        f.mirostat_eta_list = RawList::Text(sixty);
        f.mirostat_list = "0, 1, 2".into();
        f.generations = 4_000_000_000;

        assert_eq!(
            f.validate().unwrap_err(),
            ValidationError::TooManyIterations {
                total: None,
                max: MAX_ITERATIONS,
            }
        );
    }

    #[test]
    fn test_form_deserializes_mixed_scalars_and_strings() {
        let json = r#"{
            "models": ["a"], "prompts": ["p"], "generations": 2,
            "temperature_list": "0.1, 0.9", "repeat_penalty_list": 1.1,
            "top_k_list": "20,40", "top_p_list": 0.9, "repeat_last_n_list": 64,
            "tfs_z_list": 1, "mirostat_list": 0, "mirostat_tau_list": 5,
            "mirostat_eta_list": "0.1"
        }"#;
        let f: GridForm = serde_json::from_str(json).unwrap();
        let params = f.validate().unwrap();
        assert_eq!(params.temperature, vec![0.1, 0.9]);
        assert_eq!(params.top_k, vec![20, 40]);
        assert_eq!(params.iteration_count(), 8);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let f: GridForm =
            serde_json::from_str(r#"{"models": ["a"], "prompts": ["p"], "top_k_list": "20, 40"}"#)
                .unwrap();
        let params = f.validate().unwrap();
        assert_eq!(params.generations, 1);
        assert_eq!(params.temperature, vec![0.7]);
        assert_eq!(params.top_k, vec![20, 40]);
    }

    #[test]
    fn test_round_trips_through_form_text() {
        let mut f = form();
        f.temperature_list = "0.1, 0.5".into();
        f.top_k_list = "10, 20".into();
        let params = f.validate().unwrap();

        let back = GridForm::from(&params);
        assert_eq!(back.temperature_list, RawList::Text("0.1, 0.5".to_string()));
        assert_eq!(back.validate().unwrap(), params);
    }
}
