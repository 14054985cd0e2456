//! Cycle orchestration for the skycast transparency pipeline.
//!
//! Fetches the source files of a forecast cycle, extracts and scores them,
//! publishes the result to the cache and folds it into the climatology:
//!
//! - [`archive`] and [`download`] stage remote GRIB2 files
//! - [`pipeline`] drives one cycle through its lifecycle
//! - [`scheduler`] keeps the cache on the newest cycle
//! - [`state`] is the SQLite ledger of cycles and files

pub mod archive;
pub mod config;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod telemetry;

pub use archive::{HttpArchive, LocalArchive, SourceArchive};
pub use config::PipelineConfig;
pub use download::{DownloadConfig, DownloadManager, FetchReport, PlannedFile};
pub use error::{FetchError, PipelineError, Result};
pub use pipeline::{BackfillReport, CycleOutcome, Pipeline};
pub use scheduler::Scheduler;
pub use state::PipelineLedger;
