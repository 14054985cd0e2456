//! Cycle and file ledger persisted in SQLite with sqlx.
//!
//! The cache directory is the source of truth for what is published; the
//! ledger records how each cycle got there (or why it did not) and survives
//! restarts for the `status` subcommand.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sky_common::{CycleId, CycleStatus, ForecastHorizon};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::download::FetchReport;
use crate::error::{PipelineError, Result};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS cycles (
        cycle TEXT NOT NULL,
        horizon TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error_message TEXT,
        PRIMARY KEY (cycle, horizon)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        url TEXT PRIMARY KEY,
        cycle TEXT NOT NULL,
        source TEXT NOT NULL,
        forecast_hour INTEGER NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER DEFAULT 0,
        bytes INTEGER,
        updated_at TEXT NOT NULL,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_files_cycle ON files(cycle)",
];

/// A cycle as recorded in the ledger.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub cycle: CycleId,
    pub horizon: String,
    pub status: CycleStatus,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// A file that could not be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedFileRecord {
    pub url: String,
    pub source: String,
    pub forecast_hour: u32,
    pub attempts: u32,
    pub error_message: Option<String>,
}

/// Counts of cycles per status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStats {
    pub in_flight: u64,
    pub published: u64,
    pub failed: u64,
    pub files_fetched: u64,
    pub files_failed: u64,
}

pub struct PipelineLedger {
    pool: SqlitePool,
}

impl PipelineLedger {
    /// Open or create the ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ledger = Self::with_pool(pool).await?;
        info!(path = %path.display(), "Opened pipeline ledger");
        Ok(ledger)
    }

    /// Open an in-memory ledger (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Record a cycle status. Transitions the lifecycle does not allow are
    /// logged and ignored. A cycle may always restart at `Pending`: failed
    /// runs, runs cut short by a restart and cycles whose cache was wiped.
    pub async fn set_cycle_status(
        &self,
        cycle: &CycleId,
        horizon: &ForecastHorizon,
        status: CycleStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let key = cycle.key();
        let label = horizon.label();
        if let Some(current) = self.cycle_status(cycle, horizon).await? {
            let restart = status == CycleStatus::Pending;
            if current != status && !current.can_transition_to(status) && !restart {
                warn!(
                    cycle = %key,
                    from = current.as_str(),
                    to = status.as_str(),
                    "Ignoring invalid cycle transition"
                );
                return Ok(());
            }
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO cycles (cycle, horizon, status, created_at, updated_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cycle, horizon) DO UPDATE
            SET status = excluded.status,
                updated_at = excluded.updated_at,
                error_message = excluded.error_message
            "#,
        )
        .bind(&key)
        .bind(&label)
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .bind(error)
        .execute(&self.pool)
        .await?;

        debug!(cycle = %key, status = status.as_str(), "Recorded cycle status");
        Ok(())
    }

    pub async fn cycle_status(
        &self,
        cycle: &CycleId,
        horizon: &ForecastHorizon,
    ) -> Result<Option<CycleStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM cycles WHERE cycle = ? AND horizon = ?")
                .bind(cycle.key())
                .bind(horizon.label())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(s,)| CycleStatus::from_str(&s).map_err(PipelineError::from))
            .transpose()
    }

    /// Most recently updated cycles first.
    pub async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT cycle, horizon, status, updated_at, error_message
            FROM cycles
            ORDER BY updated_at DESC, cycle DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(cycle, horizon, status, updated_at, error_message)| -> Result<CycleRecord> {
                Ok(CycleRecord {
                    cycle: CycleId::parse_key(&cycle)?,
                    horizon,
                    status: CycleStatus::from_str(&status)?,
                    updated_at: DateTime::parse_from_rfc3339(&updated_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    error_message,
                })
            })
            .collect()
    }

    /// Record the outcome of every file of a fetch.
    pub async fn record_fetch(&self, cycle: &CycleId, report: &FetchReport) -> Result<()> {
        let key = cycle.key();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let upsert = r#"
            INSERT INTO files (url, cycle, source, forecast_hour, status, attempts, bytes, updated_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE
            SET status = excluded.status,
                attempts = files.attempts + excluded.attempts,
                bytes = COALESCE(excluded.bytes, files.bytes),
                updated_at = excluded.updated_at,
                error_message = excluded.error_message
        "#;

        for f in &report.fetched {
            sqlx::query(upsert)
                .bind(&f.file.url)
                .bind(&key)
                .bind(f.file.kind.as_str())
                .bind(f.file.hour as i64)
                .bind("fetched")
                .bind(f.attempts as i64)
                .bind(Some(f.bytes as i64))
                .bind(&now)
                .bind(None::<String>)
                .execute(&mut *tx)
                .await?;
        }
        for f in &report.skipped {
            sqlx::query(upsert)
                .bind(&f.url)
                .bind(&key)
                .bind(f.kind.as_str())
                .bind(f.hour as i64)
                .bind("fetched")
                .bind(0i64)
                .bind(None::<i64>)
                .bind(&now)
                .bind(None::<String>)
                .execute(&mut *tx)
                .await?;
        }
        for f in &report.failed {
            sqlx::query(upsert)
                .bind(&f.file.url)
                .bind(&key)
                .bind(f.file.kind.as_str())
                .bind(f.file.hour as i64)
                .bind("failed")
                .bind(f.attempts as i64)
                .bind(None::<i64>)
                .bind(&now)
                .bind(Some(f.error.to_string()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn failed_files(&self, cycle: &CycleId) -> Result<Vec<FailedFileRecord>> {
        let rows: Vec<(String, String, i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT url, source, forecast_hour, attempts, error_message
            FROM files
            WHERE cycle = ? AND status = 'failed'
            ORDER BY source, forecast_hour
            "#,
        )
        .bind(cycle.key())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FailedFileRecord {
                url: row.0,
                source: row.1,
                forecast_hour: row.2 as u32,
                attempts: row.3 as u32,
                error_message: row.4,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let cycles: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM cycles GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let files: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM files GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = LedgerStats::default();
        for (status, count) in cycles {
            match CycleStatus::from_str(&status) {
                Ok(CycleStatus::Published) => stats.published += count as u64,
                Ok(CycleStatus::Failed) => stats.failed += count as u64,
                Ok(s) if s.is_in_flight() => stats.in_flight += count as u64,
                _ => {}
            }
        }
        for (status, count) in files {
            match status.as_str() {
                "fetched" => stats.files_fetched += count as u64,
                "failed" => stats.files_failed += count as u64,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Drop file rows of cycles older than the given time.
    pub async fn cleanup_before(&self, cutoff: &CycleId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE cycle < ?")
            .bind(cutoff.key())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{FailedFile, FetchedFile, PlannedFile};
    use crate::error::FetchError;
    use sky_common::SourceKind;
    use std::path::PathBuf;
    use test_utils::cycle;

    fn planned(kind: SourceKind, hour: u32) -> PlannedFile {
        PlannedFile {
            kind,
            hour,
            url: format!("{}/f{:03}", kind.as_str(), hour),
            dest: PathBuf::from("/raw"),
        }
    }

    #[tokio::test]
    async fn test_cycle_lifecycle() {
        let ledger = PipelineLedger::open_memory().await.unwrap();
        let id = cycle(2024, 6, 1, 0);
        let horizon = ForecastHorizon::default();

        assert_eq!(ledger.cycle_status(&id, &horizon).await.unwrap(), None);
        for status in [
            CycleStatus::Pending,
            CycleStatus::Fetching,
            CycleStatus::Extracting,
            CycleStatus::Scoring,
            CycleStatus::Published,
        ] {
            ledger.set_cycle_status(&id, &horizon, status, None).await.unwrap();
        }
        assert_eq!(
            ledger.cycle_status(&id, &horizon).await.unwrap(),
            Some(CycleStatus::Published)
        );

        // Published is terminal.
        ledger
            .set_cycle_status(&id, &horizon, CycleStatus::Fetching, None)
            .await
            .unwrap();
        assert_eq!(
            ledger.cycle_status(&id, &horizon).await.unwrap(),
            Some(CycleStatus::Published)
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_can_restart() {
        let ledger = PipelineLedger::open_memory().await.unwrap();
        let id = cycle(2024, 6, 1, 6);
        let horizon = ForecastHorizon::default();

        ledger.set_cycle_status(&id, &horizon, CycleStatus::Pending, None).await.unwrap();
        ledger
            .set_cycle_status(&id, &horizon, CycleStatus::Failed, Some("deadline"))
            .await
            .unwrap();
        let recent = ledger.recent_cycles(10).await.unwrap();
        assert_eq!(recent[0].error_message.as_deref(), Some("deadline"));

        ledger.set_cycle_status(&id, &horizon, CycleStatus::Pending, None).await.unwrap();
        assert_eq!(
            ledger.cycle_status(&id, &horizon).await.unwrap(),
            Some(CycleStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_record_fetch() {
        let ledger = PipelineLedger::open_memory().await.unwrap();
        let id = cycle(2024, 6, 1, 12);
        let report = FetchReport {
            fetched: vec![FetchedFile {
                file: planned(SourceKind::Deterministic, 0),
                attempts: 2,
                bytes: 1024,
            }],
            skipped: vec![planned(SourceKind::Deterministic, 1)],
            failed: vec![FailedFile {
                file: planned(SourceKind::Ensemble, 3),
                attempts: 6,
                error: FetchError::NotFound("ensemble/f003".into()),
            }],
        };
        ledger.record_fetch(&id, &report).await.unwrap();

        let failed = ledger.failed_files(&id).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source, "ensemble");
        assert_eq!(failed[0].forecast_hour, 3);
        assert_eq!(failed[0].attempts, 6);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.files_fetched, 2);
        assert_eq!(stats.files_failed, 1);

        assert_eq!(ledger.cleanup_before(&cycle(2024, 6, 2, 0)).await.unwrap(), 3);
    }
}
