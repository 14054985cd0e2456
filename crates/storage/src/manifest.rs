//! Per-cycle manifest written next to the hour files.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sky_common::{CycleId, CycleStatus, ForecastHorizon, MissingField};

use crate::error::{Result, StorageError};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub cycle: CycleId,
    pub horizon: ForecastHorizon,
    pub status: CycleStatus,
    pub grid_width: usize,
    pub grid_height: usize,
    pub valid_hours: Vec<u32>,
    #[serde(default)]
    pub missing: Vec<MissingField>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new(cycle: CycleId, horizon: ForecastHorizon, grid_width: usize, grid_height: usize) -> Self {
        Self {
            cycle,
            horizon,
            status: CycleStatus::Pending,
            grid_width,
            grid_height,
            valid_hours: Vec::new(),
            missing: Vec::new(),
            created_at: Utc::now(),
            published_at: None,
        }
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(serde_json::from_slice(&text)?)
    }

    /// Write through a temporary file, fsync, then rename over the target.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        crate::fsutil::write_atomic(&dir.join(MANIFEST_FILE), &json).await
    }

    pub fn is_published(&self) -> bool {
        self.status == CycleStatus::Published
    }
}
