//! Error types for the shared model.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised while constructing or addressing shared model types.
#[derive(Debug, Error, PartialEq)]
pub enum CommonError {
    #[error("Invalid cycle: {0}")]
    InvalidCycle(String),

    #[error("{axis} {value} is out of range")]
    CoordinateOutOfRange { axis: &'static str, value: f64 },

    #[error("Array dimensions mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid forecast horizon: {0}")]
    InvalidHorizon(String),

    #[error("Score {0} is outside 0..=100")]
    ScoreOutOfRange(u8),

    #[error("Invalid cycle status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
