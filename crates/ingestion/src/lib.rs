//! Forecast field ingestion.
//!
//! Turns staged GRIB2 files into [`RawFieldArray`]s on the canonical grid:
//!
//! - [`selector`] picks the messages that carry each tracked variable
//! - [`regrid`] resamples source grids onto the canonical grid
//! - [`ensemble`] reduces ensemble members to one representative field
//! - [`extractor`] ties these together behind the [`FieldSource`] trait
//!
//! [`RawFieldArray`]: sky_common::RawFieldArray

pub mod ensemble;
pub mod error;
pub mod extractor;
pub mod regrid;
pub mod selector;

// Re-exports
pub use ensemble::EnsembleReduction;
pub use error::{IngestionError, Result};
pub use extractor::{
    extract_cycle, staged_path, CycleFields, FieldSource, StagedGribSource, ENSEMBLE_STEP_HOURS,
};
pub use regrid::{RegridMethod, Regridder, SourceGrid};
pub use selector::{FieldSelector, SelectedField};
