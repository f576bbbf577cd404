// src/grid/mod.rs
// Grid input: list parsing, form validation and enumeration

pub mod enumerate;
pub mod form;
pub mod params;

pub use enumerate::{enumerate, GridParameters, ParamIteration, MAX_ITERATIONS};
pub use form::GridForm;
pub use params::{parse, ParamKind, RawList, ValidationError};
