//! Error types for scoring.

use std::path::PathBuf;

use sky_common::CommonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Failed to read score table {path}: {source}")]
    TableRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse score table: {0}")]
    TableParse(#[from] serde_json::Error),

    #[error("Invalid score table: {0}")]
    InvalidTable(String),

    #[error("Invalid rating table: {0}")]
    InvalidRating(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

pub type Result<T> = std::result::Result<T, ScoringError>;
