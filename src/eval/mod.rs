//! Judgment-based evaluation of files and diffs.

pub mod engine;

pub use engine::{EvaluationEngine, NO_CHANGES_SENTINEL};
