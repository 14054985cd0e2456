//! One cycle from remote files to a published snapshot.
//!
//! `Pending → Fetching → Extracting → Scoring → Published`, or `Failed`
//! from any of them. Every transition is written to the ledger; only the
//! publish step touches what readers see.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use climatology::{
    archive_cycles, BortleTable, Climatology, FoldReport, HistoryStore, MeteorShowerTable,
};
use ingestion::{extract_cycle, CycleFields, StagedGribSource};
use scoring::{ScoreEngine, ScoreTable};
use sky_common::{CanonicalGrid, CycleId, CycleStatus, ForecastHorizon, HourRecords, SourceKind};
use storage::{CacheConfig, CacheStore, CleanReport, Snapshot};
use tracing::{error, info, instrument, warn};

use crate::archive::{self, SourceArchive};
use crate::config::PipelineConfig;
use crate::download::{plan_cycle, DownloadConfig, DownloadManager, FetchReport};
use crate::error::{PipelineError, Result};
use crate::state::PipelineLedger;
use crate::telemetry;

/// How a cycle run ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Published {
        snapshot: Arc<Snapshot>,
        missing_fields: usize,
        fold: FoldReport,
    },
    /// The cycle was already in the cache; nothing was done.
    AlreadyPublished(CycleId),
    /// Another run holds the cycle.
    Busy(CycleId),
}

/// Totals of a history backfill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub cycles: usize,
    pub folded: usize,
    pub failed: usize,
    pub fold: FoldReport,
}

pub struct Pipeline {
    config: PipelineConfig,
    grid: Arc<CanonicalGrid>,
    horizon: ForecastHorizon,
    store: CacheStore,
    ledger: PipelineLedger,
    downloads: DownloadManager,
    engine: Arc<ScoreEngine>,
    climatology: Arc<Climatology>,
}

impl Pipeline {
    /// Build a pipeline fetching from the configured archive.
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let archive: Arc<dyn SourceArchive> = Arc::from(archive::from_config(&config.archive)?);
        Self::with_archive(config, archive).await
    }

    pub async fn with_archive(
        config: PipelineConfig,
        archive: Arc<dyn SourceArchive>,
    ) -> Result<Self> {
        config.validate()?;
        let grid = Arc::new(config.grid.build());
        let horizon = config.horizon.build()?;

        let cache_config = CacheConfig {
            root: config.cache_root.clone(),
            retain_cycles: config.cache.retain_cycles,
        };
        let store = CacheStore::open(&cache_config, grid.width(), grid.height()).await?;
        let ledger = PipelineLedger::open(&config.state_db_path()).await?;

        let table = match &config.scoring.score_table {
            Some(path) => ScoreTable::load(path)?,
            None => ScoreTable::builtin()?,
        };
        let engine = Arc::new(ScoreEngine::new(
            Arc::new(table),
            grid.clone(),
            config.scoring.engine,
        ));

        let bortle = match &config.climatology.bortle_map {
            Some(path) => BortleTable::load(path, grid.len()).await?,
            None => BortleTable::unknown(grid.len()),
        };
        let showers = match &config.climatology.meteor_showers {
            Some(path) => MeteorShowerTable::load(path).await?,
            None => MeteorShowerTable::builtin()?,
        };
        let climatology = Arc::new(Climatology::new(
            grid.clone(),
            HistoryStore::new(store.history_dir(), grid.len()),
            bortle,
            showers.with_peak_moon_illumination(),
        ));

        let downloads = DownloadManager::new(archive, DownloadConfig::from(&config.download));

        info!(
            cache_root = %config.cache_root.display(),
            horizon = %horizon.label(),
            cells = grid.len(),
            "Pipeline ready"
        );
        Ok(Self {
            config,
            grid,
            horizon,
            store,
            ledger,
            downloads,
            engine,
            climatology,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn grid(&self) -> &Arc<CanonicalGrid> {
        &self.grid
    }

    pub fn horizon(&self) -> ForecastHorizon {
        self.horizon
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn ledger(&self) -> &PipelineLedger {
        &self.ledger
    }

    pub fn climatology(&self) -> &Arc<Climatology> {
        &self.climatology
    }

    /// Newest cycle that should be complete upstream at `now`.
    pub fn latest_cycle(&self, now: DateTime<Utc>) -> CycleId {
        CycleId::latest_available(now, self.config.schedule.delay_hours)
    }

    /// Run one cycle end to end. `today` picks the climatology month.
    #[instrument(skip(self), fields(cycle = %id))]
    pub async fn run_cycle(&self, id: CycleId, today: NaiveDate) -> Result<CycleOutcome> {
        let Some(_guard) = self.store.begin_cycle(id) else {
            info!("Cycle already in flight, skipping");
            return Ok(CycleOutcome::Busy(id));
        };
        if self.store.get_cycle(&id, &self.horizon).await?.is_some() {
            info!("Cycle already published");
            return Ok(CycleOutcome::AlreadyPublished(id));
        }

        match self.process(id, today).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "Cycle failed");
                telemetry::record_failed();
                let message = e.to_string();
                if let Err(ledger_err) = self
                    .ledger
                    .set_cycle_status(&id, &self.horizon, CycleStatus::Failed, Some(&message))
                    .await
                {
                    warn!(error = %ledger_err, "Could not record failure");
                }
                Err(e)
            }
        }
    }

    async fn process(&self, id: CycleId, today: NaiveDate) -> Result<CycleOutcome> {
        self.set_status(&id, CycleStatus::Pending).await?;

        self.set_status(&id, CycleStatus::Fetching).await?;
        let raw_dir = self.config.raw_dir(&id);
        let report = self.fetch(&id, &self.horizon, &raw_dir).await?;
        self.ledger.record_fetch(&id, &report).await?;
        if report.usable(SourceKind::Deterministic) == 0 {
            return Err(PipelineError::NothingFetched(id));
        }
        let ensemble_failed = report.failed_count(SourceKind::Ensemble);
        if ensemble_failed > 0 {
            warn!(files = ensemble_failed, "Ensemble files missing, aerosol will be absent");
        }

        self.set_status(&id, CycleStatus::Extracting).await?;
        let fields = self.extract(&raw_dir, self.horizon).await?;

        self.set_status(&id, CycleStatus::Scoring).await?;
        let missing = fields.missing;
        let engine = self.engine.clone();
        let hours = fields.hours;
        let records =
            tokio::task::spawn_blocking(move || engine.score_cycle(&id, &hours)).await??;

        let snapshot = self.publish(id, records, missing).await?;
        let missing_fields = snapshot.missing().len();
        self.set_status(&id, CycleStatus::Published).await?;
        telemetry::record_published(&id, missing_fields);

        let fold = match self
            .climatology
            .history()
            .fold_snapshot(&snapshot, today)
            .await
        {
            Ok(report) => {
                telemetry::record_rejected(report.rejected);
                report
            }
            Err(e) => {
                warn!(error = %e, "Climatology fold failed");
                FoldReport::default()
            }
        };

        remove_cycle_staging(&raw_dir).await;
        info!(missing_fields, "Cycle complete");
        Ok(CycleOutcome::Published {
            snapshot,
            missing_fields,
            fold,
        })
    }

    async fn set_status(&self, id: &CycleId, status: CycleStatus) -> Result<()> {
        self.ledger
            .set_cycle_status(id, &self.horizon, status, None)
            .await
    }

    /// Fetch phase under the configured deadline.
    async fn fetch(
        &self,
        id: &CycleId,
        horizon: &ForecastHorizon,
        raw_dir: &Path,
    ) -> Result<FetchReport> {
        let plan = plan_cycle(&self.config.sources, id, horizon, raw_dir);
        let deadline = self.config.schedule.fetch_deadline();
        tokio::time::timeout(deadline, self.downloads.fetch_all(plan))
            .await
            .map_err(|_| PipelineError::Deadline {
                cycle: *id,
                deadline,
            })
    }

    async fn extract(&self, raw_dir: &Path, horizon: ForecastHorizon) -> Result<CycleFields> {
        let source = StagedGribSource::new(raw_dir, self.grid.clone())
            .with_method(self.config.extraction.regrid)
            .with_reduction(self.config.extraction.ensemble_reduction)
            .with_ensemble_step(self.config.sources.ensemble.step);
        let fields = tokio::task::spawn_blocking(move || extract_cycle(&source, &horizon)).await?;
        Ok(fields)
    }

    async fn publish(
        &self,
        id: CycleId,
        records: Vec<HourRecords>,
        missing: Vec<sky_common::MissingField>,
    ) -> Result<Arc<Snapshot>> {
        let mut writer = self.store.writer(id, self.horizon).await?;
        for hour in records {
            if let Err(e) = writer.write_hour(hour).await {
                writer.discard().await;
                return Err(e.into());
            }
        }
        writer.set_missing(missing);
        Ok(writer.publish().await?)
    }

    /// Fold the analysis hour of archived 12z cycles into `month` without
    /// publishing anything.
    #[instrument(skip(self))]
    pub async fn backfill(
        &self,
        month: u32,
        start_year: i32,
        end_year: i32,
    ) -> Result<BackfillReport> {
        let cycles = archive_cycles(start_year, end_year, month)?;
        let analysis = ForecastHorizon::new(0, 1)?;
        let mut report = BackfillReport {
            cycles: cycles.len(),
            ..Default::default()
        };
        info!(cycles = cycles.len(), "Starting history backfill");

        for id in cycles {
            let Some(_guard) = self.store.begin_cycle(id) else {
                warn!(cycle = %id, "Cycle in flight, not backfilled");
                report.failed += 1;
                continue;
            };
            let raw_dir = self.config.raw_dir(&id);
            let result = self.backfill_cycle(id, month, &analysis, &raw_dir).await;
            remove_cycle_staging(&raw_dir).await;
            match result {
                Ok(fold) => {
                    report.folded += 1;
                    report.fold += fold;
                }
                Err(e) => {
                    warn!(cycle = %id, error = %e, "Backfill of cycle failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            folded = report.folded,
            failed = report.failed,
            accepted = report.fold.accepted,
            "History backfill finished"
        );
        Ok(report)
    }

    async fn backfill_cycle(
        &self,
        id: CycleId,
        month: u32,
        analysis: &ForecastHorizon,
        raw_dir: &Path,
    ) -> Result<FoldReport> {
        let fetched = self.fetch(&id, analysis, raw_dir).await?;
        if fetched.usable(SourceKind::Deterministic) == 0 {
            return Err(PipelineError::NothingFetched(id));
        }
        let fields = self.extract(raw_dir, *analysis).await?;
        let engine = self.engine.clone();
        let hours = fields.hours;
        let mut records =
            tokio::task::spawn_blocking(move || engine.score_cycle(&id, &hours)).await??;
        let Some(analysis_hour) = records.pop() else {
            return Err(PipelineError::NothingFetched(id));
        };
        let fold = self
            .climatology
            .history()
            .fold_hour(&analysis_hour, month)
            .await?;
        telemetry::record_rejected(fold.rejected);
        Ok(fold)
    }

    /// Maintenance pass: drop cycles older than `max_age_hours` and
    /// abandoned staging directories, then prune the ledger.
    #[instrument(skip(self))]
    pub async fn clean(&self, now: DateTime<Utc>) -> Result<CleanReport> {
        let report = self
            .store
            .clear_stale(self.config.cache.max_age(), now)
            .await?;
        let age = ChronoDuration::hours(self.config.cache.max_age_hours as i64);
        let cutoff = CycleId::latest_available(now - age, 0);
        let pruned = self.ledger.cleanup_before(&cutoff).await?;
        info!(
            cycles_removed = report.cycles_removed.len(),
            staging_removed = report.staging_removed,
            ledger_rows = pruned,
            "Clean finished"
        );
        Ok(report)
    }
}

/// `staging/<key>/raw` belongs to one cycle; remove the whole `<key>` dir.
async fn remove_cycle_staging(raw_dir: &Path) {
    let dir: PathBuf = raw_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| raw_dir.to_path_buf());
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "Could not remove raw files");
        }
    }
}
