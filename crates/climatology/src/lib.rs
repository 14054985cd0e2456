//! Historical transparency climatology.
//!
//! Folds the analysis hour of every published cycle into per-month running
//! means and joins them, at read time, with static sky reference data:
//! light pollution, the meteor shower calendar, new moons and the Milky Way
//! season.

pub mod accumulator;
pub mod archive;
pub mod bortle;
pub mod error;
pub mod history;
pub mod meteor;
pub mod season;
pub mod summary;

pub use accumulator::{FoldReport, MonthlyAccumulator};
pub use archive::{archive_cycles, ARCHIVE_CYCLE_HOUR, MIN_ARCHIVE_YEAR};
pub use bortle::BortleTable;
pub use error::{ClimatologyError, Result};
pub use history::{HistoryStore, SAMPLE_HOUR};
pub use meteor::{MeteorShower, MeteorShowerTable};
pub use scoring::new_moon_dates;
pub use season::{core_max_altitude, milky_way_season, season_by_row};
pub use summary::{Climatology, MonthSummary};
