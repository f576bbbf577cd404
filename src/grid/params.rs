//! Parameter list parsing.
//!
//! Form fields accept either a bare number or a comma-delimited string such as
//! `"0.1, 0.5, 0.9"`. Values keep their input order and duplicates are kept.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static EMBEDDED_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d\s+\d").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{field}: invalid {expected} list {input:?}. Use commas to delimit values.")]
    MalformedList {
        field: String,
        expected: ParamKind,
        input: String,
    },
    #[error("{field}: value {value} is out of range")]
    OutOfRange { field: String, value: String },
    #[error("Select at least 1 model.")]
    NoModels,
    #[error("Select at least 1 prompt.")]
    NoPrompts,
    #[error("Model {index} is empty.")]
    EmptyModel { index: usize },
    #[error("Prompt {index} is empty.")]
    EmptyPrompt { index: usize },
    #[error("generations must be at least 1, got {value}")]
    InvalidGenerations { value: i64 },
    /// `total` is `None` when the product overflows.
    #[error("Grid expands to more than {max} iterations. Use fewer values.")]
    TooManyIterations { total: Option<usize>, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamKind::Int => write!(f, "int"),
            ParamKind::Float => write!(f, "float"),
        }
    }
}

/// Raw value of a list field as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawList {
    Number(f64),
    Text(String),
}

impl From<&str> for RawList {
    fn from(s: &str) -> Self {
        RawList::Text(s.to_string())
    }
}

impl From<f64> for RawList {
    fn from(v: f64) -> Self {
        RawList::Number(v)
    }
}

impl std::fmt::Display for RawList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawList::Number(v) => write!(f, "{}", v),
            RawList::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Parse a raw list into numbers of the requested kind.
///
/// Integers truncate toward zero (`"1.9"` yields `1`).
pub fn parse(raw: &RawList, kind: ParamKind) -> Result<Vec<f64>, ValidationError> {
    parse_field("value", raw, kind)
}

pub(crate) fn parse_field(
    field: &str,
    raw: &RawList,
    kind: ParamKind,
) -> Result<Vec<f64>, ValidationError> {
    let malformed = || ValidationError::MalformedList {
        field: field.to_string(),
        expected: kind,
        input: raw.to_string(),
    };

    match raw {
        RawList::Number(v) if v.is_finite() => Ok(vec![apply_kind(*v, kind)]),
        RawList::Number(_) => Err(malformed()),
        RawList::Text(text) => text
            .split(',')
            .map(|segment| parse_segment(segment, kind).ok_or_else(malformed))
            .collect(),
    }
}

fn parse_segment(segment: &str, kind: ParamKind) -> Option<f64> {
    let trimmed = segment.trim();
    if trimmed.is_empty() || EMBEDDED_WHITESPACE.is_match(trimmed) {
        return None;
    }
    let value: f64 = match kind {
        ParamKind::Int => match trimmed.parse::<i64>() {
            Ok(i) => i as f64,
            Err(_) => trimmed.parse().ok()?,
        },
        ParamKind::Float => trimmed.parse().ok()?,
    };
    value.is_finite().then(|| apply_kind(value, kind))
}

fn apply_kind(value: f64, kind: ParamKind) -> f64 {
    match kind {
        ParamKind::Int => value.trunc(),
        ParamKind::Float => value,
    }
}

pub(crate) fn parse_f32_list(field: &str, raw: &RawList) -> Result<Vec<f32>, ValidationError> {
    parse_field(field, raw, ParamKind::Float)?
        .into_iter()
        .map(|v| {
            let narrowed = v as f32;
            if narrowed.is_finite() {
                Ok(narrowed)
            } else {
                Err(out_of_range(field, v))
            }
        })
        .collect()
}

pub(crate) fn parse_int_list<T>(field: &str, raw: &RawList) -> Result<Vec<T>, ValidationError>
where
    T: TryFrom<i64>,
{
    parse_field(field, raw, ParamKind::Int)?
        .into_iter()
        .map(|v| {
            if v < i64::MIN as f64 || v > i64::MAX as f64 {
                return Err(out_of_range(field, v));
            }
            T::try_from(v as i64).map_err(|_| out_of_range(field, v))
        })
        .collect()
}

fn out_of_range(field: &str, value: f64) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
    }
}
