//! Error types for the cache store.

use std::path::PathBuf;

use sky_common::CommonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache file: {0}")]
    Codec(String),

    #[error("Checksum mismatch: expected {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unsupported cache format version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Cycle {0} is already published")]
    AlreadyPublished(String),

    #[error("Cycle {cycle} is incomplete, missing hours {missing_hours:?}")]
    Incomplete { cycle: String, missing_hours: Vec<u32> },

    #[error("Hour {0} is not part of this snapshot")]
    HourNotFound(u32),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
