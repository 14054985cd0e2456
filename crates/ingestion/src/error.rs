//! Error types for the ingestion crate.

use std::path::PathBuf;

use sky_common::{CommonError, Variable};
use thiserror::Error;

/// Errors that can occur while extracting a field.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staged file not found: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to parse GRIB2 data: {0}")]
    Grib2Parse(#[from] grib2_parser::Grib2Error),

    #[error("No message matches {variable} at hour {hour}")]
    NoMatchingMessage { variable: Variable, hour: u32 },

    #[error("Every value of {variable} at hour {hour} is missing")]
    AllMissing { variable: Variable, hour: u32 },

    #[error("Unsupported source grid: {0}")]
    UnsupportedGrid(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
