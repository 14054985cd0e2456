//! Error types for the historical aggregator.

use std::path::PathBuf;

use sky_common::CommonError;
use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClimatologyError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid month {0}, expected 1..=12")]
    InvalidMonth(u32),

    #[error("Invalid year range: {0}")]
    InvalidYears(String),

    #[error("Unreadable accumulator {path}: {reason}")]
    CorruptAccumulator { path: PathBuf, reason: String },

    #[error("Accumulator covers {actual} cells, grid has {expected}")]
    CellCount { expected: usize, actual: usize },

    #[error("Invalid meteor shower table: {0}")]
    MeteorTable(#[from] serde_json::Error),

    #[error("Meteor shower {0} peaks outside its activity period")]
    ShowerPeriod(String),

    #[error("Invalid Bortle table: {0}")]
    Bortle(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Common(#[from] CommonError),
}

pub type Result<T> = std::result::Result<T, ClimatologyError>;

/// Check a calendar month number.
pub fn check_month(month: u32) -> Result<u32> {
    if (1..=12).contains(&month) {
        Ok(month)
    } else {
        Err(ClimatologyError::InvalidMonth(month))
    }
}
