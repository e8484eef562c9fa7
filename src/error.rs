//! Error types for the combiner and backtester.

use std::path::PathBuf;
use thiserror::Error;

/// Domain errors raised while loading, combining and evaluating races.
///
/// Per-race and per-runner variants are recovered by the caller (skip and warn).
/// File-level and fold-level variants abort the run.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A required numeric attribute is absent for a runner.
    #[error("race {race_no}: runner '{horse}' is missing required field '{field}'")]
    MissingField {
        race_no: u32,
        horse: String,
        field: &'static str,
    },

    /// A race has no eligible runners after filtering.
    #[error("race {race_no} has no eligible runners")]
    EmptyRace { race_no: u32 },

    /// A finishing position could not be matched to any runner.
    #[error("race {race_no}: result for '{horse}' (pos {pos}) matches no runner")]
    UnmatchedResult { race_no: u32, horse: String, pos: u32 },

    /// An input file could not be parsed into the expected shape.
    #[error("malformed input file {}: {reason}", path.display())]
    MalformedInputFile { path: PathBuf, reason: String },

    /// Fold construction was asked for zero folds.
    #[error("number of folds must be at least 1, got {0}")]
    InvalidFoldCount(usize),
}

impl ModelError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ModelError::MalformedInputFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is recoverable by skipping the offending race or runner.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ModelError::MissingField { .. }
                | ModelError::EmptyRace { .. }
                | ModelError::UnmatchedResult { .. }
        )
    }
}
