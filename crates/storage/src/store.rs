//! Staging, atomic publication and retention of cycle snapshots.
//!
//! Layout under the cache root:
//!
//! ```text
//! staging/<cycle>-<uuid>/                 cycle being written
//! cycles/<horizon>/<cycle>/manifest.json  published snapshot
//! cycles/<horizon>/<cycle>/hours/f000.bin
//! history/                                climatology accumulators
//! ```
//!
//! A snapshot becomes visible only through the rename from `staging/` into
//! `cycles/` followed by the swap of the in-memory current pointer.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sky_common::{
    CommonError, CycleId, CycleStatus, ForecastHorizon, ForecastRecord, HourRecords, MissingField,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::codec::{decode_hour, encode_hour};
use crate::error::{Result, StorageError};
use crate::fsutil::{list_dirs, sync_dir, write_synced};
use crate::manifest::{Manifest, MANIFEST_FILE};

const STAGING_DIR: &str = "staging";
const CYCLES_DIR: &str = "cycles";
const HISTORY_DIR: &str = "history";
const HOURS_DIR: &str = "hours";

fn default_retain_cycles() -> usize {
    3
}

/// Cache store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root: PathBuf,
    /// Published cycles kept per horizon.
    #[serde(default = "default_retain_cycles")]
    pub retain_cycles: usize,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retain_cycles: default_retain_cycles(),
        }
    }
}

fn hour_file(dir: &Path, hour: u32) -> PathBuf {
    dir.join(HOURS_DIR).join(format!("f{:03}.bin", hour))
}

/// An immutable, fully published cycle.
#[derive(Debug)]
pub struct Snapshot {
    manifest: Manifest,
    dir: PathBuf,
}

impl Snapshot {
    pub fn id(&self) -> CycleId {
        self.manifest.cycle
    }

    pub fn horizon(&self) -> ForecastHorizon {
        self.manifest.horizon
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn valid_hours(&self) -> &[u32] {
        &self.manifest.valid_hours
    }

    pub fn missing(&self) -> &[MissingField] {
        &self.manifest.missing
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cell_count(&self) -> usize {
        self.manifest.grid_width * self.manifest.grid_height
    }

    pub async fn read_hour(&self, hour: u32) -> Result<HourRecords> {
        if !self.manifest.valid_hours.contains(&hour) {
            return Err(StorageError::HourNotFound(hour));
        }
        let path = hour_file(&self.dir, hour);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        let records = tokio::task::spawn_blocking(move || decode_hour(&data)).await??;
        if records.valid_hour != hour {
            return Err(StorageError::Codec(format!(
                "{} holds hour {}",
                path.display(),
                records.valid_hour
            )));
        }
        Ok(records)
    }

    /// One cell of one hour; `None` when the cell is off the grid.
    pub async fn record(&self, cell: usize, hour: u32) -> Result<Option<ForecastRecord>> {
        Ok(self.read_hour(hour).await?.record(cell))
    }
}

/// Releases the in-flight claim on a cycle when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    id: CycleId,
    in_flight: Arc<Mutex<HashSet<CycleId>>>,
}

impl InFlightGuard {
    pub fn id(&self) -> CycleId {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.id);
    }
}

/// Outcome of a maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub cycles_removed: Vec<CycleId>,
    pub staging_removed: usize,
}

struct Inner {
    root: PathBuf,
    retain_cycles: usize,
    grid_width: usize,
    grid_height: usize,
    current: RwLock<HashMap<ForecastHorizon, Arc<Snapshot>>>,
    in_flight: Arc<Mutex<HashSet<CycleId>>>,
}

/// Handle to the on-disk cache. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    /// Open (or create) the cache, reload published snapshots and drop any
    /// staging directories left by an interrupted run.
    #[instrument(skip(config), fields(root = %config.root.display()))]
    pub async fn open(config: &CacheConfig, grid_width: usize, grid_height: usize) -> Result<Self> {
        let root = config.root.clone();
        for dir in [STAGING_DIR, CYCLES_DIR, HISTORY_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }

        let leftovers = list_dirs(&root.join(STAGING_DIR)).await?;
        for dir in &leftovers {
            remove_dir(dir).await;
        }
        if !leftovers.is_empty() {
            warn!(count = leftovers.len(), "Removed leftover staging directories");
        }

        let mut current: HashMap<ForecastHorizon, Arc<Snapshot>> = HashMap::new();
        let mut loaded = 0usize;
        for horizon_dir in list_dirs(&root.join(CYCLES_DIR)).await? {
            for dir in list_dirs(&horizon_dir).await? {
                let manifest = match Manifest::load(&dir).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Skipping unreadable snapshot");
                        continue;
                    }
                };
                if !manifest.is_published() {
                    warn!(dir = %dir.display(), status = %manifest.status, "Skipping unpublished snapshot");
                    continue;
                }
                if (manifest.grid_width, manifest.grid_height) != (grid_width, grid_height) {
                    warn!(
                        dir = %dir.display(),
                        width = manifest.grid_width,
                        height = manifest.grid_height,
                        "Skipping snapshot on a different grid"
                    );
                    continue;
                }
                loaded += 1;
                let snapshot = Arc::new(Snapshot { manifest, dir });
                let newer = current
                    .get(&snapshot.horizon())
                    .map_or(true, |c| snapshot.id() > c.id());
                if newer {
                    current.insert(snapshot.horizon(), snapshot);
                }
            }
        }

        info!(
            snapshots = loaded,
            horizons = current.len(),
            "Cache store opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                retain_cycles: config.retain_cycles.max(1),
                grid_width,
                grid_height,
                current: RwLock::new(current),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Directory reserved for climatology files.
    pub fn history_dir(&self) -> PathBuf {
        self.inner.root.join(HISTORY_DIR)
    }

    fn cycles_dir(&self, horizon: &ForecastHorizon) -> PathBuf {
        self.inner.root.join(CYCLES_DIR).join(horizon.label())
    }

    fn cycle_dir(&self, id: &CycleId, horizon: &ForecastHorizon) -> PathBuf {
        self.cycles_dir(horizon).join(id.key())
    }

    /// Claim a cycle for processing. `None` when it is already in flight.
    pub fn begin_cycle(&self, id: CycleId) -> Option<InFlightGuard> {
        let mut set = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            id,
            in_flight: self.inner.in_flight.clone(),
        })
    }

    pub fn is_in_flight(&self, id: &CycleId) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    /// Start writing a cycle into a fresh staging directory.
    pub async fn writer(&self, id: CycleId, horizon: ForecastHorizon) -> Result<CycleWriter> {
        let dir = self
            .inner
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}", id.key(), Uuid::new_v4()));
        let hours = dir.join(HOURS_DIR);
        tokio::fs::create_dir_all(&hours)
            .await
            .map_err(|e| StorageError::io(&hours, e))?;

        let manifest = Manifest::new(id, horizon, self.inner.grid_width, self.inner.grid_height);
        manifest.save(&dir).await?;
        debug!(cycle = %id, dir = %dir.display(), "Opened staging directory");

        Ok(CycleWriter {
            store: self.clone(),
            dir,
            manifest,
            written: BTreeSet::new(),
        })
    }

    pub async fn get_current(&self, horizon: &ForecastHorizon) -> Option<Arc<Snapshot>> {
        self.inner.current.read().await.get(horizon).cloned()
    }

    /// A published cycle, whether current or retained.
    pub async fn get_cycle(&self, id: &CycleId, horizon: &ForecastHorizon) -> Result<Option<Arc<Snapshot>>> {
        if let Some(current) = self.get_current(horizon).await {
            if current.id() == *id {
                return Ok(Some(current));
            }
        }
        let dir = self.cycle_dir(id, horizon);
        if !dir.join(MANIFEST_FILE).exists() {
            return Ok(None);
        }
        let manifest = Manifest::load(&dir).await?;
        if !manifest.is_published() {
            return Ok(None);
        }
        Ok(Some(Arc::new(Snapshot { manifest, dir })))
    }

    /// Published cycles on disk for a horizon, oldest first.
    pub async fn list_cycles(&self, horizon: &ForecastHorizon) -> Result<Vec<CycleId>> {
        let mut ids: Vec<CycleId> = list_dirs(&self.cycles_dir(horizon))
            .await?
            .iter()
            .filter_map(|d| d.file_name()?.to_str()?.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn install(&self, snapshot: Arc<Snapshot>) {
        let mut current = self.inner.current.write().await;
        let replace = current
            .get(&snapshot.horizon())
            .map_or(true, |c| snapshot.id() >= c.id());
        if replace {
            info!(cycle = %snapshot.id(), horizon = %snapshot.horizon(), "Current snapshot swapped");
            current.insert(snapshot.horizon(), snapshot);
        } else {
            info!(cycle = %snapshot.id(), "Published older cycle; current snapshot unchanged");
        }
    }

    /// Evict the oldest published cycles beyond the retention count. The
    /// current cycle is never evicted.
    pub async fn enforce_retention(&self, horizon: &ForecastHorizon) -> Result<Vec<CycleId>> {
        let current = self.get_current(horizon).await.map(|s| s.id());
        let mut ids = self.list_cycles(horizon).await?;
        ids.reverse();

        let mut removed = Vec::new();
        for id in ids.into_iter().skip(self.inner.retain_cycles) {
            if Some(id) == current {
                continue;
            }
            remove_dir(&self.cycle_dir(&id, horizon)).await;
            removed.push(id);
        }
        if !removed.is_empty() {
            info!(horizon = %horizon, evicted = removed.len(), "Retention applied");
        }
        Ok(removed)
    }

    /// Remove published cycles issued more than `max_age` before `now`
    /// (except the current ones) and staging directories not in flight.
    pub async fn clear_stale(&self, max_age: Duration, now: DateTime<Utc>) -> Result<CleanReport> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StorageError::Codec(format!("max age: {}", e)))?;
        let cutoff = now - max_age;
        let mut report = CleanReport::default();

        let currents: HashSet<(String, CycleId)> = self
            .inner
            .current
            .read()
            .await
            .iter()
            .map(|(h, s)| (h.label(), s.id()))
            .collect();

        for horizon_dir in list_dirs(&self.inner.root.join(CYCLES_DIR)).await? {
            let label = dir_name(&horizon_dir);
            for dir in list_dirs(&horizon_dir).await? {
                let Ok(id) = dir_name(&dir).parse::<CycleId>() else {
                    continue;
                };
                if id.issued_at() >= cutoff || currents.contains(&(label.clone(), id)) {
                    continue;
                }
                remove_dir(&dir).await;
                report.cycles_removed.push(id);
            }
        }

        for dir in list_dirs(&self.inner.root.join(STAGING_DIR)).await? {
            let name = dir_name(&dir);
            let key = name.split('-').next().unwrap_or_default();
            let busy = key
                .parse::<CycleId>()
                .map(|id| self.is_in_flight(&id))
                .unwrap_or(false);
            if !busy {
                remove_dir(&dir).await;
                report.staging_removed += 1;
            }
        }

        info!(
            cycles_removed = report.cycles_removed.len(),
            staging_removed = report.staging_removed,
            "Stale cache entries cleared"
        );
        Ok(report)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %path.display(), error = %e, "Failed to remove directory");
        }
    }
}

/// Writes one cycle into staging and publishes it atomically.
pub struct CycleWriter {
    store: CacheStore,
    dir: PathBuf,
    manifest: Manifest,
    written: BTreeSet<u32>,
}

impl CycleWriter {
    pub fn id(&self) -> CycleId {
        self.manifest.cycle
    }

    pub fn staging_dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_missing(&mut self, missing: Vec<MissingField>) {
        self.manifest.missing = missing;
    }

    /// Encode and durably write one hour.
    pub async fn write_hour(&mut self, records: HourRecords) -> Result<()> {
        let hour = records.valid_hour;
        if !self.manifest.horizon.contains(hour) {
            return Err(StorageError::HourNotFound(hour));
        }
        let cells = self.manifest.grid_width * self.manifest.grid_height;
        if records.cell_count() != cells {
            return Err(CommonError::DimensionMismatch {
                expected: cells,
                actual: records.cell_count(),
            }
            .into());
        }

        let bytes = tokio::task::spawn_blocking(move || encode_hour(&records)).await??;
        write_synced(&hour_file(&self.dir, hour), &bytes).await?;
        self.written.insert(hour);
        Ok(())
    }

    /// Make the cycle visible. On any failure the staging directory is
    /// removed and the previous snapshot stays current.
    #[instrument(skip(self), fields(cycle = %self.manifest.cycle))]
    pub async fn publish(mut self) -> Result<Arc<Snapshot>> {
        match self.finalize().await {
            Ok(snapshot) => {
                let store = self.store.clone();
                store.install(snapshot.clone()).await;
                if let Err(e) = store.enforce_retention(&snapshot.horizon()).await {
                    warn!(error = %e, "Retention pass failed");
                }
                Ok(snapshot)
            }
            Err(e) => {
                error!(error = %e, "Publish failed; discarding staging directory");
                remove_dir(&self.dir).await;
                Err(e)
            }
        }
    }

    async fn finalize(&mut self) -> Result<Arc<Snapshot>> {
        let expected = self.manifest.horizon.valid_hours();
        let missing_hours: Vec<u32> = expected
            .iter()
            .copied()
            .filter(|h| !self.written.contains(h))
            .collect();
        if !missing_hours.is_empty() {
            return Err(StorageError::Incomplete {
                cycle: self.manifest.cycle.key(),
                missing_hours,
            });
        }

        let target = self
            .store
            .cycle_dir(&self.manifest.cycle, &self.manifest.horizon);
        if target.exists() {
            return Err(StorageError::AlreadyPublished(self.manifest.cycle.key()));
        }
        let parent = self.store.cycles_dir(&self.manifest.horizon);
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::io(&parent, e))?;

        self.manifest.valid_hours = expected;
        self.manifest.status = CycleStatus::Published;
        self.manifest.published_at = Some(Utc::now());
        self.manifest.save(&self.dir).await?;
        sync_dir(&self.dir.join(HOURS_DIR)).await;
        sync_dir(&self.dir).await;

        tokio::fs::rename(&self.dir, &target)
            .await
            .map_err(|e| StorageError::io(&target, e))?;
        sync_dir(&parent).await;

        info!(
            dir = %target.display(),
            hours = self.manifest.valid_hours.len(),
            missing_fields = self.manifest.missing.len(),
            "Cycle published"
        );
        Ok(Arc::new(Snapshot {
            manifest: self.manifest.clone(),
            dir: target,
        }))
    }

    /// Abandon the cycle and remove its staging directory.
    pub async fn discard(self) {
        remove_dir(&self.dir).await;
    }
}
