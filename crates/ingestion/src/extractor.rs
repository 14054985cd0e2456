//! Producing canonical-grid fields for a whole cycle.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use grib2_parser::{GridDefinition, Grib2Message, Grib2Reader};
use rayon::prelude::*;
use sky_common::{
    CanonicalGrid, ForecastHorizon, HourFields, MissingField, RawFieldArray, SourceKind, Variable,
};
use tracing::{debug, info, instrument, warn};

use crate::ensemble::EnsembleReduction;
use crate::error::{IngestionError, Result};
use crate::regrid::{RegridMethod, Regridder};
use crate::selector::FieldSelector;

/// Lead-time spacing of the ensemble source, hours.
pub const ENSEMBLE_STEP_HOURS: u32 = 3;

/// Something that can produce a field on the canonical grid.
pub trait FieldSource: Send + Sync {
    fn extract(&self, variable: Variable, valid_hour: u32) -> Result<RawFieldArray>;

    /// Lead time actually read for a valid hour. Hours that map to the same
    /// source hour share one extraction.
    fn source_hour(&self, _variable: Variable, valid_hour: u32) -> u32 {
        valid_hour
    }

    /// Canonical grid dimensions as (width, height).
    fn dimensions(&self) -> (usize, usize);
}

/// Location of a staged file: `<raw_dir>/<source>/<source>.f<hhh>.grib2`.
pub fn staged_path(raw_dir: &Path, source: SourceKind, hour: u32) -> PathBuf {
    raw_dir
        .join(source.as_str())
        .join(format!("{}.f{:03}.grib2", source.as_str(), hour))
}

/// Reads staged GRIB2 files of one cycle.
pub struct StagedGribSource {
    raw_dir: PathBuf,
    grid: Arc<CanonicalGrid>,
    method: RegridMethod,
    reduction: EnsembleReduction,
    ensemble_step: u32,
    regridders: Mutex<HashMap<GridDefinition, Arc<Regridder>>>,
}

impl StagedGribSource {
    pub fn new(raw_dir: impl Into<PathBuf>, grid: Arc<CanonicalGrid>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            grid,
            method: RegridMethod::default(),
            reduction: EnsembleReduction::default(),
            ensemble_step: ENSEMBLE_STEP_HOURS,
            regridders: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_method(mut self, method: RegridMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_reduction(mut self, reduction: EnsembleReduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_ensemble_step(mut self, step: u32) -> Self {
        self.ensemble_step = step.max(1);
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    fn read_messages(&self, path: &Path) -> Result<Vec<Grib2Message>> {
        let data = std::fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                IngestionError::MissingFile(path.to_path_buf())
            } else {
                IngestionError::FileRead {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        // Messages the parser rejects (unsupported templates, bad sections)
        // are skipped; only a truncation ends the file.
        let mut reader = Grib2Reader::new(Bytes::from(data));
        let mut messages = Vec::new();
        let mut first_error = None;
        loop {
            match reader.next_message() {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => break,
                Err(e) if e.is_truncation() => {
                    warn!(path = %path.display(), error = %e, "Stopping at truncated message");
                    first_error.get_or_insert(e);
                    break;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable message");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if messages.is_empty() => Err(e.into()),
            _ => Ok(messages),
        }
    }

    fn regridder(&self, grid: &GridDefinition) -> Result<Arc<Regridder>> {
        let mut cache = self
            .regridders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(r) = cache.get(grid) {
            return Ok(r.clone());
        }
        let regridder = Arc::new(Regridder::new(grid, &self.grid, self.method)?);
        debug!(
            ni = grid.ni,
            nj = grid.nj,
            covered = regridder.covered_cells(),
            "Built regridder"
        );
        cache.insert(grid.clone(), regridder.clone());
        Ok(regridder)
    }
}

impl FieldSource for StagedGribSource {
    fn extract(&self, variable: Variable, valid_hour: u32) -> Result<RawFieldArray> {
        let source_hour = self.source_hour(variable, valid_hour);
        let path = staged_path(&self.raw_dir, variable.source(), source_hour);
        let messages = self.read_messages(&path)?;

        let selected = FieldSelector::for_variable(variable).select(&messages, source_hour)?;
        let values = self.reduction.reduce(&selected.members);
        let regridded = self.regridder(&selected.grid)?.apply(&values)?;

        let mut field = RawFieldArray::new(
            variable,
            valid_hour,
            self.grid.width(),
            self.grid.height(),
            regridded,
        )?;
        let masked = field.mask_invalid();
        if masked > 0 {
            debug!(%variable, valid_hour, masked, "Masked out-of-range values");
        }
        Ok(field)
    }

    fn source_hour(&self, variable: Variable, valid_hour: u32) -> u32 {
        match variable.source() {
            SourceKind::Deterministic => valid_hour,
            SourceKind::Ensemble => valid_hour / self.ensemble_step * self.ensemble_step,
        }
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.grid.width(), self.grid.height())
    }
}

/// Every field of a cycle, with the ones that could not be produced.
#[derive(Debug, Clone)]
pub struct CycleFields {
    pub hours: Vec<HourFields>,
    pub missing: Vec<MissingField>,
}

impl CycleFields {
    pub fn is_missing(&self, variable: Variable, valid_hour: u32) -> bool {
        self.missing
            .iter()
            .any(|m| m.variable == variable && m.valid_hour == valid_hour)
    }
}

/// Extract every (variable, hour) field of the horizon in parallel.
///
/// Failures never abort the cycle: the field is recorded as missing and
/// filled with NaN.
#[instrument(skip(source), fields(hours = horizon.len()))]
pub fn extract_cycle(source: &dyn FieldSource, horizon: &ForecastHorizon) -> CycleFields {
    let (width, height) = source.dimensions();
    let valid_hours = horizon.valid_hours();

    let mut jobs: Vec<(Variable, u32)> = valid_hours
        .iter()
        .flat_map(|&h| Variable::ALL.map(|v| (v, source.source_hour(v, h))))
        .collect();
    jobs.sort();
    jobs.dedup();

    let results: BTreeMap<(Variable, u32), std::result::Result<RawFieldArray, String>> = jobs
        .into_par_iter()
        .map(|(variable, source_hour)| {
            let result = source.extract(variable, source_hour).map_err(|e| {
                warn!(%variable, source_hour, error = %e, "Field unavailable");
                e.to_string()
            });
            ((variable, source_hour), result)
        })
        .collect();

    let mut hours = Vec::with_capacity(valid_hours.len());
    let mut missing = Vec::new();
    for &valid_hour in &valid_hours {
        let mut fields = HourFields::missing(valid_hour, width, height);
        for variable in Variable::ALL {
            let key = (variable, source.source_hour(variable, valid_hour));
            match results.get(&key) {
                Some(Ok(field)) => {
                    let mut field = field.clone();
                    field.valid_hour = valid_hour;
                    fields.set(field);
                }
                Some(Err(reason)) => missing.push(MissingField {
                    variable,
                    valid_hour,
                    reason: reason.clone(),
                }),
                None => missing.push(MissingField {
                    variable,
                    valid_hour,
                    reason: "not extracted".to_string(),
                }),
            }
        }
        hours.push(fields);
    }

    info!(
        fields = valid_hours.len() * Variable::ALL.len(),
        missing = missing.len(),
        "Cycle extraction complete"
    );
    CycleFields { hours, missing }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingAerosol;

    impl FieldSource for FailingAerosol {
        fn extract(&self, variable: Variable, valid_hour: u32) -> Result<RawFieldArray> {
            if variable == Variable::AerosolOpticalDepth {
                return Err(IngestionError::NoMatchingMessage {
                    variable,
                    hour: valid_hour,
                });
            }
            Ok(RawFieldArray::new(variable, valid_hour, 2, 1, vec![valid_hour as f32; 2])?)
        }

        fn source_hour(&self, variable: Variable, valid_hour: u32) -> u32 {
            match variable.source() {
                SourceKind::Deterministic => valid_hour,
                SourceKind::Ensemble => valid_hour / 3 * 3,
            }
        }

        fn dimensions(&self) -> (usize, usize) {
            (2, 1)
        }
    }

    #[test]
    fn test_staged_path_layout() {
        let path = staged_path(Path::new("/tmp/raw"), SourceKind::Ensemble, 9);
        assert_eq!(path, PathBuf::from("/tmp/raw/ensemble/ensemble.f009.grib2"));
    }

    #[test]
    fn test_failures_become_missing_fields() {
        let horizon = ForecastHorizon::new(5, 1).unwrap();
        let fields = extract_cycle(&FailingAerosol, &horizon);

        assert_eq!(fields.hours.len(), 6);
        assert_eq!(fields.missing.len(), 6);
        assert!(fields.is_missing(Variable::AerosolOpticalDepth, 4));
        assert!(!fields.is_missing(Variable::CloudCover, 4));

        let hour4 = &fields.hours[4];
        assert_eq!(hour4.cloud_cover.value_at(0), Some(4.0));
        assert!(hour4.aod.is_all_missing());
    }
}
