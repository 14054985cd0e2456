//! Common types shared by every stage of the transparency pipeline.
//!
//! Everything that crosses a crate boundary lives here: the canonical grid,
//! cycle identities and their lifecycle, raw field arrays and the scored
//! per-hour records that end up in the cache.

pub mod cycle;
pub mod error;
pub mod field;
pub mod grid;
pub mod record;
pub mod time;

pub use cycle::{CycleId, CycleStatus, SourceKind, SYNOPTIC_HOURS};
pub use error::{CommonError, CommonResult};
pub use field::{HourFields, MissingField, RawFieldArray, Variable};
pub use grid::{CanonicalGrid, ScanMode};
pub use record::{
    ForecastRecord, HistoricalRecord, HourRecords, MilkyWayActivity, SCORE_MISSING,
};
pub use time::ForecastHorizon;
