//! On-disk monthly accumulators under the cache's `history/` directory.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Utc};
use sky_common::HourRecords;
use storage::fsutil::write_atomic;
use storage::Snapshot;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::accumulator::{FoldReport, MonthlyAccumulator};
use crate::error::{check_month, ClimatologyError, Result};

/// Valid hour sampled from each folded cycle.
pub const SAMPLE_HOUR: u32 = 0;

pub struct HistoryStore {
    dir: PathBuf,
    cells: usize,
    // Serialises read-modify-write of accumulator files.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, cells: usize) -> Self {
        Self {
            dir: dir.into(),
            cells,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn month_path(&self, month: u32) -> PathBuf {
        self.dir.join(format!("month-{:02}.bin", month))
    }

    /// The accumulator for a month, empty if nothing has been folded yet.
    pub async fn load(&self, month: u32) -> Result<MonthlyAccumulator> {
        check_month(month)?;
        let path = self.month_path(month);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MonthlyAccumulator::new(month, self.cells);
            }
            Err(e) => return Err(ClimatologyError::Read { path, source: e }),
        };
        let acc = tokio::task::spawn_blocking(move || MonthlyAccumulator::decode(&data))
            .await
            .map_err(storage::StorageError::from)?
            .map_err(|e| ClimatologyError::CorruptAccumulator {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if acc.cell_count() != self.cells {
            return Err(ClimatologyError::CellCount {
                expected: self.cells,
                actual: acc.cell_count(),
            });
        }
        if acc.month() != month {
            warn!(path = %path.display(), stored = acc.month(), "Accumulator month does not match its file name");
        }
        Ok(acc)
    }

    pub async fn save(&self, acc: &MonthlyAccumulator) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ClimatologyError::Read {
                path: self.dir.clone(),
                source: e,
            })?;
        let bytes = acc.encode()?;
        write_atomic(&self.month_path(acc.month()), &bytes).await?;
        Ok(())
    }

    /// Move an unreadable month file aside as `month-MM.bin.corrupt-<time>`.
    async fn quarantine(&self, month: u32) -> Result<PathBuf> {
        let path = self.month_path(month);
        let mut aside = path.as_os_str().to_owned();
        aside.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let aside = PathBuf::from(aside);
        tokio::fs::rename(&path, &aside)
            .await
            .map_err(|e| ClimatologyError::Read { path, source: e })?;
        Ok(aside)
    }

    /// Fold one hour of scores into a month and persist the result.
    ///
    /// A month file that cannot be decoded, or that was written for another
    /// grid, is moved aside and the month starts over.
    pub async fn fold_hour(&self, records: &HourRecords, month: u32) -> Result<FoldReport> {
        let _guard = self.write_lock.lock().await;
        let mut acc = match self.load(month).await {
            Ok(acc) => acc,
            Err(
                e @ (ClimatologyError::CorruptAccumulator { .. }
                | ClimatologyError::CellCount { .. }),
            ) => {
                let aside = self.quarantine(month).await?;
                warn!(
                    month,
                    error = %e,
                    moved_to = %aside.display(),
                    "Starting month over from an empty accumulator"
                );
                MonthlyAccumulator::new(month, self.cells)?
            }
            Err(e) => return Err(e),
        };
        let report = acc.fold_scores(&records.score)?;
        self.save(&acc).await?;
        Ok(report)
    }

    /// Fold a published snapshot's analysis hour into the month of `today`.
    #[instrument(skip(self, snapshot), fields(cycle = %snapshot.id()))]
    pub async fn fold_snapshot(&self, snapshot: &Snapshot, today: NaiveDate) -> Result<FoldReport> {
        let records = snapshot.read_hour(SAMPLE_HOUR).await?;
        let month = today.month();
        let report = self.fold_hour(&records, month).await?;
        if report.rejected > 0 {
            warn!(month, rejected = report.rejected, "Some cells were not folded");
        }
        info!(
            month,
            accepted = report.accepted,
            missing = report.missing,
            "Folded cycle into climatology"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sky_common::SCORE_MISSING;

    fn hour(scores: Vec<u8>) -> HourRecords {
        let n = scores.len();
        HourRecords {
            valid_hour: 0,
            cloud_cover: vec![0.0; n],
            humidity: vec![0.0; n],
            aod: vec![0.0; n],
            score: scores,
            dark: vec![0; n],
            moon_altitude: vec![0.0; n],
            milky_way: vec![0; n],
            moon_illumination: 0.0,
        }
    }

    #[tokio::test]
    async fn test_fold_persists_between_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history"), 2);

        for s in [40, 60, 80] {
            store.fold_hour(&hour(vec![s, SCORE_MISSING]), 3).await.unwrap();
        }
        let acc = store.load(3).await.unwrap();
        assert_eq!(acc.mean(0), Some(60.0));
        assert_eq!(acc.count(0), 3);
        assert_eq!(acc.mean(1), None);

        store.fold_hour(&hour(vec![20, 10]), 3).await.unwrap();
        let acc = store.load(3).await.unwrap();
        assert_eq!(acc.mean(0), Some(50.0));
        assert_eq!(acc.count(0), 4);
        assert_eq!(acc.count(1), 1);

        assert!(store.month_path(3).ends_with("month-03.bin"));
        assert_eq!(store.load(4).await.unwrap().count(0), 0);
    }

    #[tokio::test]
    async fn test_corrupt_month_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path(), 2);
        store.fold_hour(&hour(vec![30, 40]), 7).await.unwrap();
        std::fs::write(store.month_path(7), b"not an accumulator").unwrap();

        assert!(matches!(
            store.load(7).await,
            Err(ClimatologyError::CorruptAccumulator { .. })
        ));

        let report = store.fold_hour(&hour(vec![90, SCORE_MISSING]), 7).await.unwrap();
        assert_eq!(report.accepted, 1);
        let acc = store.load(7).await.unwrap();
        assert_eq!(acc.mean(0), Some(90.0));
        assert_eq!(acc.count(0), 1);
        assert_eq!(acc.count(1), 0);

        let aside: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("month-07.bin.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
    }

    #[tokio::test]
    async fn test_cell_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        HistoryStore::new(dir.path(), 2)
            .fold_hour(&hour(vec![1, 2]), 5)
            .await
            .unwrap();
        assert!(matches!(
            HistoryStore::new(dir.path(), 3).load(5).await,
            Err(ClimatologyError::CellCount { .. })
        ));
    }
}
