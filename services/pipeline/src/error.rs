//! Error types for the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use sky_common::{CommonError, CycleId};
use thiserror::Error;

/// A single file could not be retrieved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid payload: {0}")]
    Invalid(String),

    #[error("Local I/O error: {0}")]
    Io(String),
}

impl FetchError {
    /// Whether retrying may help. Files that are not yet upstream are
    /// retried too, since runs appear gradually.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::NotFound(_) | FetchError::Invalid(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Io(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cycle {0} is already being processed")]
    Busy(CycleId),

    #[error("Fetch phase of cycle {cycle} exceeded {deadline:?}")]
    Deadline { cycle: CycleId, deadline: Duration },

    #[error("Nothing usable was fetched for cycle {0}")]
    NothingFetched(CycleId),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Ingestion(#[from] ingestion::IngestionError),

    #[error(transparent)]
    Scoring(#[from] scoring::ScoringError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Climatology(#[from] climatology::ClimatologyError),

    #[error("State ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
