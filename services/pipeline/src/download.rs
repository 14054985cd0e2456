//! Fetching the source files of a cycle.
//!
//! Every file is retried with exponential backoff, validated as GRIB2 and
//! written to a `.partial` sibling before being renamed into place, so a
//! staged file is always complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use grib2_parser::Grib2Reader;
use ingestion::staged_path;
use metrics::counter;
use sky_common::{CycleId, ForecastHorizon, SourceKind};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::archive::SourceArchive;
use crate::config::{DownloadSettings, SourcesConfig};
use crate::error::FetchError;
use crate::telemetry::DOWNLOADS_TOTAL;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub max_concurrent: usize,
    pub min_file_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::from(&DownloadSettings::default())
    }
}

impl From<&DownloadSettings> for DownloadConfig {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_retry_delay: Duration::from_millis(settings.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(settings.max_retry_delay_ms),
            max_concurrent: settings.max_concurrent.max(1),
            min_file_size: settings.min_file_size,
        }
    }
}

/// One file to fetch and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub kind: SourceKind,
    /// Lead time of the file.
    pub hour: u32,
    pub url: String,
    pub dest: PathBuf,
}

/// Every file a cycle needs: one deterministic file per valid hour and one
/// ensemble file per distinct ensemble lead time.
pub fn plan_cycle(
    sources: &SourcesConfig,
    cycle: &CycleId,
    horizon: &ForecastHorizon,
    raw_dir: &Path,
) -> Vec<PlannedFile> {
    let valid_hours = horizon.valid_hours();
    let ensemble_step = sources.ensemble.step.max(1);
    let mut ensemble_hours: Vec<u32> = valid_hours
        .iter()
        .map(|h| h / ensemble_step * ensemble_step)
        .collect();
    ensemble_hours.dedup();

    let planned = |kind: SourceKind, hour: u32| PlannedFile {
        kind,
        hour,
        url: sources.get(kind).render_url(cycle, hour),
        dest: staged_path(raw_dir, kind, hour),
    };

    valid_hours
        .iter()
        .map(|&h| planned(SourceKind::Deterministic, h))
        .chain(ensemble_hours.into_iter().map(|h| planned(SourceKind::Ensemble, h)))
        .collect()
}

/// Cheap structural check of a downloaded payload. Returns the message count.
pub fn validate_grib(data: &[u8], min_size: usize) -> Result<usize, FetchError> {
    if data.len() < min_size {
        return Err(FetchError::Invalid(format!(
            "{} bytes is below the minimum of {}",
            data.len(),
            min_size
        )));
    }
    if !data.starts_with(b"GRIB") {
        return Err(FetchError::Invalid("missing GRIB marker".into()));
    }
    let spans = Grib2Reader::scan(data).map_err(|e| FetchError::Invalid(e.to_string()))?;
    Ok(spans.len())
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub file: PlannedFile,
    pub attempts: u32,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct FailedFile {
    pub file: PlannedFile,
    pub attempts: u32,
    pub error: FetchError,
}

#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub fetched: Vec<FetchedFile>,
    /// Already staged by an earlier attempt.
    pub skipped: Vec<PlannedFile>,
    pub failed: Vec<FailedFile>,
}

impl FetchReport {
    /// Files of a source that are staged and usable.
    pub fn usable(&self, kind: SourceKind) -> usize {
        self.fetched.iter().filter(|f| f.file.kind == kind).count()
            + self.skipped.iter().filter(|f| f.kind == kind).count()
    }

    pub fn failed_count(&self, kind: SourceKind) -> usize {
        self.failed.iter().filter(|f| f.file.kind == kind).count()
    }
}

/// Result of downloading one file, retries included.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Fetched { attempts: u32, bytes: usize },
    Skipped,
    Failed { attempts: u32, error: FetchError },
}

pub struct DownloadManager {
    archive: Arc<dyn SourceArchive>,
    config: DownloadConfig,
}

impl DownloadManager {
    pub fn new(archive: Arc<dyn SourceArchive>, config: DownloadConfig) -> Self {
        Self { archive, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Fetch every planned file, `max_concurrent` at a time. Individual
    /// failures are reported, never raised.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn fetch_all(&self, files: Vec<PlannedFile>) -> FetchReport {
        let outcomes: Vec<(PlannedFile, DownloadOutcome)> = stream::iter(files)
            .map(|file| async move {
                let outcome = self.download(&file).await;
                (file, outcome)
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        let mut report = FetchReport::default();
        for (file, outcome) in outcomes {
            match outcome {
                DownloadOutcome::Fetched { attempts, bytes } => report.fetched.push(FetchedFile {
                    file,
                    attempts,
                    bytes,
                }),
                DownloadOutcome::Skipped => report.skipped.push(file),
                DownloadOutcome::Failed { attempts, error } => report.failed.push(FailedFile {
                    file,
                    attempts,
                    error,
                }),
            }
        }
        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Fetch finished"
        );
        report
    }

    pub async fn download(&self, file: &PlannedFile) -> DownloadOutcome {
        let kind = file.kind.as_str();
        if self.is_staged(&file.dest).await {
            debug!(path = %file.dest.display(), "Already staged, skipping download");
            counter!(DOWNLOADS_TOTAL, "source" => kind, "outcome" => "skipped")
                .increment(1);
            return DownloadOutcome::Skipped;
        }

        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;
        loop {
            attempts += 1;
            match self.try_fetch(file).await {
                Ok(bytes) => {
                    counter!(DOWNLOADS_TOTAL, "source" => kind, "outcome" => "fetched")
                        .increment(1);
                    debug!(url = %file.url, bytes, attempts, "Staged");
                    return DownloadOutcome::Fetched { attempts, bytes };
                }
                Err(error) if !error.is_transient() || attempts > self.config.max_retries => {
                    counter!(DOWNLOADS_TOTAL, "source" => kind, "outcome" => "failed")
                        .increment(1);
                    warn!(url = %file.url, attempts, error = %error, "Download failed");
                    return DownloadOutcome::Failed { attempts, error };
                }
                Err(error) => {
                    warn!(
                        url = %file.url,
                        error = %error,
                        retry = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
            }
        }
    }

    async fn try_fetch(&self, file: &PlannedFile) -> Result<usize, FetchError> {
        let data = self.archive.fetch(&file.url).await?;

        let io = |e: std::io::Error| FetchError::Io(format!("{}: {}", file.dest.display(), e));
        if let Some(parent) = file.dest.parent() {
            fs::create_dir_all(parent).await.map_err(io)?;
        }
        let partial = partial_path(&file.dest);
        fs::write(&partial, &data).await.map_err(io)?;
        if let Err(e) = validate_grib(&data, self.config.min_file_size) {
            fs::remove_file(&partial).await.ok();
            return Err(e);
        }
        if fs::rename(&partial, &file.dest).await.is_err() {
            // rename failed (likely cross-device), fall back to copy+delete
            fs::copy(&partial, &file.dest).await.map_err(io)?;
            fs::remove_file(&partial).await.map_err(io)?;
        }
        Ok(data.len())
    }

    /// A staged file left by an earlier attempt counts only if it validates.
    async fn is_staged(&self, path: &Path) -> bool {
        let Ok(data) = fs::read(path).await else {
            return false;
        };
        match validate_grib(&data, self.config.min_file_size) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding invalid staged file");
                fs::remove_file(path).await.ok();
                false
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LocalArchive;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_utils::{cycle, Grib2Builder};

    fn fast_config() -> DownloadConfig {
        DownloadConfig {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
            max_concurrent: 3,
            min_file_size: 64,
        }
    }

    fn local_sources() -> SourcesConfig {
        let mut sources = SourcesConfig::default();
        sources.deterministic.base_url.clear();
        sources.deterministic.path_template = "det/{date}/{cycle:02}/f{forecast:03}".into();
        sources.ensemble.base_url.clear();
        sources.ensemble.path_template = "ens/{date}/{cycle:02}/f{forecast:03}".into();
        sources
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        error: FetchError,
    }

    #[async_trait]
    impl SourceArchive for Flaky {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(Bytes::from(Grib2Builder::cloud_cover().build()))
            }
        }
    }

    fn one_file(dir: &Path) -> PlannedFile {
        PlannedFile {
            kind: SourceKind::Deterministic,
            hour: 0,
            url: "det/f000".into(),
            dest: staged_path(dir, SourceKind::Deterministic, 0),
        }
    }

    #[test]
    fn test_plan_cycle() {
        let horizon = ForecastHorizon::new(6, 1).unwrap();
        let plan = plan_cycle(&local_sources(), &cycle(2024, 6, 1, 0), &horizon, Path::new("/raw"));
        let det: Vec<u32> = plan
            .iter()
            .filter(|f| f.kind == SourceKind::Deterministic)
            .map(|f| f.hour)
            .collect();
        let ens: Vec<u32> = plan
            .iter()
            .filter(|f| f.kind == SourceKind::Ensemble)
            .map(|f| f.hour)
            .collect();
        assert_eq!(det, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(ens, vec![0, 3, 6]);
        assert_eq!(plan[1].url, "det/20240601/00/f001");
        assert_eq!(
            plan[1].dest,
            Path::new("/raw/deterministic/deterministic.f001.grib2")
        );
    }

    #[test]
    fn test_validate_grib() {
        let msg = Grib2Builder::cloud_cover().build();
        assert_eq!(validate_grib(&msg, 64).unwrap(), 1);
        assert!(validate_grib(&msg[..msg.len() - 10], 64).is_err());
        assert!(validate_grib(b"GRIB", 64).is_err());
        let mut html = b"<html>".to_vec();
        html.resize(200, b' ');
        assert!(validate_grib(&html, 64).is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error: FetchError::Network("reset".into()),
        });
        let manager = DownloadManager::new(archive.clone(), fast_config());
        let report = manager.fetch_all(vec![one_file(dir.path())]).await;

        assert_eq!(report.fetched.len(), 1);
        assert_eq!(report.fetched[0].attempts, 3);
        assert!(report.fetched[0].file.dest.exists());
        assert!(!partial_path(&report.fetched[0].file.dest).exists());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: FetchError::Status(503),
        });
        let manager = DownloadManager::new(archive.clone(), fast_config());
        let report = manager.fetch_all(vec![one_file(dir.path())]).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 3);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: FetchError::Status(403),
        });
        let manager = DownloadManager::new(archive.clone(), fast_config());
        let report = manager.fetch_all(vec![one_file(dir.path())]).await;

        assert_eq!(report.failed[0].attempts, 1);
        assert_eq!(report.failed[0].error, FetchError::Status(403));
    }

    #[tokio::test]
    async fn test_fetch_all_from_local_archive() {
        let mirror = tempfile::tempdir().unwrap();
        let raw = tempfile::tempdir().unwrap();
        let sources = local_sources();
        let id = cycle(2024, 6, 1, 0);
        let horizon = ForecastHorizon::new(3, 1).unwrap();
        let plan = plan_cycle(&sources, &id, &horizon, raw.path());

        // Deterministic files only; f002 is garbage.
        for file in plan.iter().filter(|f| f.kind == SourceKind::Deterministic) {
            let path = mirror.path().join(&file.url);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let data = if file.hour == 2 {
                vec![0u8; 256]
            } else {
                Grib2Builder::cloud_cover().with_forecast_hour(file.hour).build()
            };
            std::fs::write(path, data).unwrap();
        }
        // f000 is already staged.
        let staged = staged_path(raw.path(), SourceKind::Deterministic, 0);
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, Grib2Builder::cloud_cover().build()).unwrap();

        let manager = DownloadManager::new(Arc::new(LocalArchive::new(mirror.path())), fast_config());
        let report = manager.fetch_all(plan).await;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.fetched.len(), 2);
        assert_eq!(report.usable(SourceKind::Deterministic), 3);
        assert_eq!(report.usable(SourceKind::Ensemble), 0);
        assert_eq!(report.failed_count(SourceKind::Ensemble), 2);
        let garbage = report
            .failed
            .iter()
            .find(|f| f.file.kind == SourceKind::Deterministic)
            .unwrap();
        assert_eq!(garbage.file.hour, 2);
        assert!(matches!(garbage.error, FetchError::Invalid(_)));
        assert!(!garbage.file.dest.exists());
    }
}
