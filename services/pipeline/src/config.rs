//! Pipeline configuration loaded from YAML.
//!
//! Every section has defaults, so a file only needs the values it changes.
//! See `config/pipeline.yaml` for a complete example.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ingestion::{EnsembleReduction, RegridMethod, ENSEMBLE_STEP_HOURS};
use scoring::EngineConfig;
use serde::{Deserialize, Serialize};
use sky_common::{CanonicalGrid, CycleId, ForecastHorizon, SourceKind};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache_root: PathBuf,
    /// SQLite ledger; defaults to `<cache_root>/pipeline.db`.
    pub state_db: Option<PathBuf>,
    pub grid: GridConfig,
    pub horizon: HorizonConfig,
    pub schedule: ScheduleConfig,
    pub archive: ArchiveConfig,
    pub sources: SourcesConfig,
    pub download: DownloadSettings,
    pub extraction: ExtractionConfig,
    pub scoring: ScoringConfig,
    pub cache: CacheSettings,
    pub climatology: ClimatologyConfig,
    /// Prometheus exporter listen address; metrics are not exported when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/data/skycast"),
            state_db: None,
            grid: GridConfig::default(),
            horizon: HorizonConfig::default(),
            schedule: ScheduleConfig::default(),
            archive: ArchiveConfig::default(),
            sources: SourcesConfig::default(),
            download: DownloadSettings::default(),
            extraction: ExtractionConfig::default(),
            scoring: ScoringConfig::default(),
            cache: CacheSettings::default(),
            climatology: ClimatologyConfig::default(),
            metrics_addr: None,
        }
    }
}

/// Canonical grid geometry. The default is the global quarter-degree grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub first_lat: f64,
    pub first_lng: f64,
    pub resolution: f64,
    pub height: usize,
    pub width: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            first_lat: 90.0,
            first_lng: 0.0,
            resolution: 0.25,
            height: 721,
            width: 1440,
        }
    }
}

impl GridConfig {
    pub fn build(&self) -> CanonicalGrid {
        CanonicalGrid::regular(
            self.first_lat,
            self.first_lng,
            self.resolution,
            self.height,
            self.width,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub max_hour: u32,
    pub step: u32,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            max_hour: 72,
            step: 1,
        }
    }
}

impl HorizonConfig {
    pub fn build(&self) -> Result<ForecastHorizon> {
        Ok(ForecastHorizon::new(self.max_hour, self.step)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Hours after analysis time at which a run is complete upstream.
    pub delay_hours: u32,
    /// Seconds between scheduler wake-ups.
    pub poll_interval_secs: u64,
    /// Fetch phase budget; a cycle still fetching after this is failed.
    pub fetch_deadline_secs: u64,
    /// Maintenance pass interval.
    pub clean_interval_secs: u64,
    /// Failed runs of one cycle before the scheduler gives up on it.
    pub max_attempts: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            delay_hours: 4,
            poll_interval_secs: 300,
            fetch_deadline_secs: 6 * 3600,
            clean_interval_secs: 6 * 3600,
            max_attempts: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.fetch_deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_secs(self.clean_interval_secs)
    }
}

/// Where source files come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArchiveConfig {
    Http {
        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
    /// A directory mirroring the remote layout.
    Local { root: PathBuf },
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig::Http {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// One remote source family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Prepended to every rendered path; may be empty for local archives.
    #[serde(default)]
    pub base_url: String,
    /// Path with `{date}`, `{cycle:02}` and `{forecast:03}` placeholders.
    pub path_template: String,
    /// Lead-time spacing of the published files, hours.
    #[serde(default = "default_step")]
    pub step: u32,
}

fn default_step() -> u32 {
    1
}

impl SourceConfig {
    pub fn render_path(&self, cycle: &CycleId, forecast_hour: u32) -> String {
        self.path_template
            .replace("{date}", &cycle.date_str())
            .replace("{cycle:02}", &format!("{:02}", cycle.hour()))
            .replace("{cycle}", &format!("{:02}", cycle.hour()))
            .replace("{forecast:03}", &format!("{:03}", forecast_hour))
    }

    pub fn render_url(&self, cycle: &CycleId, forecast_hour: u32) -> String {
        let path = self.render_path(cycle, forecast_hour);
        let base = self.base_url.trim_end_matches('/');
        if base.is_empty() {
            path
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub deterministic: SourceConfig,
    pub ensemble: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            deterministic: SourceConfig {
                base_url: "https://noaa-gfs-bdp-pds.s3.amazonaws.com".into(),
                path_template: "gfs.{date}/{cycle:02}/atmos/gfs.t{cycle:02}z.pgrb2.0p25.f{forecast:03}"
                    .into(),
                step: 1,
            },
            ensemble: SourceConfig {
                base_url: "https://noaa-gefs-pds.s3.amazonaws.com".into(),
                path_template:
                    "gefs.{date}/{cycle:02}/chem/pgrb2ap25/gefs.chem.t{cycle:02}z.a2d_0p25.f{forecast:03}.grib2"
                        .into(),
                step: ENSEMBLE_STEP_HOURS,
            },
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Deterministic => &self.deterministic,
            SourceKind::Ensemble => &self.ensemble,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Smallest payload accepted as a GRIB2 file, bytes.
    pub min_file_size: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_retries: 5,
            initial_retry_delay_ms: 2_000,
            max_retry_delay_ms: 120_000,
            min_file_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub regrid: RegridMethod,
    pub ensemble_reduction: EnsembleReduction,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            regrid: RegridMethod::Bilinear,
            ensemble_reduction: EnsembleReduction::Mean,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Score table JSON; the built-in table when unset.
    pub score_table: Option<PathBuf>,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub retain_cycles: usize,
    /// Published cycles older than this are removed by `clean`.
    pub max_age_hours: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            retain_cycles: 3,
            max_age_hours: 72,
        }
    }
}

impl CacheSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimatologyConfig {
    /// Raw one-byte-per-cell Bortle map; all classes unknown when unset.
    pub bortle_map: Option<PathBuf>,
    /// Meteor shower JSON; the built-in calendar when unset.
    pub meteor_showers: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));
        for (name, source) in [
            ("deterministic", &self.sources.deterministic),
            ("ensemble", &self.sources.ensemble),
        ] {
            if source.path_template.trim().is_empty() {
                return fail(format!("{} path_template is empty", name));
            }
            if source.step == 0 {
                return fail(format!("{} step must be at least 1", name));
            }
        }
        if self.horizon.step == 0 {
            return fail("horizon step must be at least 1".into());
        }
        self.horizon.build()?;
        if self.cache.retain_cycles == 0 {
            return fail("cache retain_cycles must be at least 1".into());
        }
        if self.download.max_concurrent == 0 {
            return fail("download max_concurrent must be at least 1".into());
        }
        if self.grid.width == 0 || self.grid.height == 0 || self.grid.resolution <= 0.0 {
            return fail("grid must have a positive size and resolution".into());
        }
        Ok(())
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.state_db
            .clone()
            .unwrap_or_else(|| self.cache_root.join("pipeline.db"))
    }

    /// Raw-file staging area for a cycle.
    pub fn raw_dir(&self, cycle: &CycleId) -> PathBuf {
        self.cache_root.join("staging").join(cycle.key()).join("raw")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::cycle;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.horizon.build().unwrap().len(), 73);
        assert_eq!(config.sources.ensemble.step, 3);
        assert_eq!(config.grid.build().len(), 721 * 1440);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = include_str!("../../../config/pipeline.yaml");
        let mut config = PipelineConfig::from_yaml(shipped).unwrap();
        config.cache_root = PipelineConfig::default().cache_root;
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_render_url() {
        let sources = SourcesConfig::default();
        let id = cycle(2024, 6, 1, 6);
        assert_eq!(
            sources.deterministic.render_url(&id, 7),
            "https://noaa-gfs-bdp-pds.s3.amazonaws.com/gfs.20240601/06/atmos/gfs.t06z.pgrb2.0p25.f007"
        );
        assert_eq!(
            sources.ensemble.render_path(&id, 12),
            "gefs.20240601/06/chem/pgrb2ap25/gefs.chem.t06z.a2d_0p25.f012.grib2"
        );
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
cache_root: /tmp/skycast
horizon:
  max_hour: 24
  step: 3
archive:
  type: local
  root: /srv/mirror
sources:
  deterministic:
    path_template: "det/{date}{cycle:02}/f{forecast:03}"
  ensemble:
    path_template: "ens/{date}{cycle:02}/f{forecast:03}"
    step: 3
extraction:
  regrid: nearest
  ensemble_reduction: median
scoring:
  dark_sun_altitude_deg: -12.0
metrics_addr: "127.0.0.1:9100"
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.horizon.build().unwrap().valid_hours().len(), 9);
        assert_eq!(
            config.archive,
            ArchiveConfig::Local {
                root: PathBuf::from("/srv/mirror")
            }
        );
        assert_eq!(config.extraction.regrid, RegridMethod::Nearest);
        assert_eq!(
            config.extraction.ensemble_reduction,
            EnsembleReduction::Median
        );
        assert_eq!(config.scoring.engine.dark_sun_altitude_deg, -12.0);
        assert_eq!(config.scoring.engine.milky_way_high_altitude_deg, 20.0);
        assert_eq!(config.download.max_retries, 5);
        assert_eq!(
            config.sources.deterministic.render_url(&cycle(2024, 1, 2, 18), 0),
            "det/2024010218/f000"
        );
        assert!(config.metrics_addr.is_some());
    }

    #[test]
    fn test_validation_errors() {
        assert!(PipelineConfig::from_yaml("horizon: {max_hour: 72, step: 0}").is_err());
        assert!(PipelineConfig::from_yaml("horizon: {max_hour: 10, step: 3}").is_err());
        assert!(PipelineConfig::from_yaml("cache: {retain_cycles: 0}").is_err());
        assert!(PipelineConfig::from_yaml("download: {max_concurrent: 0}").is_err());
        assert!(PipelineConfig::from_yaml(
            "sources: {deterministic: {path_template: ''}, ensemble: {path_template: x}}"
        )
        .is_err());
    }
}
