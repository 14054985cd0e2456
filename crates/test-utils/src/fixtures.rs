//! Common test fixtures.

use chrono::NaiveDate;
use sky_common::{CanonicalGrid, CycleId};
use tempfile::TempDir;

/// A coarse global grid: 4° resolution, 46 rows × 90 columns, matching the
/// default geometry of [`crate::Grib2Builder`].
pub fn coarse_global_grid() -> CanonicalGrid {
    CanonicalGrid::regular(90.0, 0.0, 4.0, 46, 90)
}

/// A tiny grid for storage and scoring tests: 2 rows × 3 columns.
pub fn tiny_grid() -> CanonicalGrid {
    CanonicalGrid::regular(10.0, 0.0, 10.0, 2, 3)
}

/// A fixed cycle used throughout the tests (2024-06-01 00z).
pub fn sample_cycle() -> CycleId {
    cycle(2024, 6, 1, 0)
}

/// Build a cycle id, panicking on invalid input (tests only).
pub fn cycle(year: i32, month: u32, day: u32, hour: u8) -> CycleId {
    let date = NaiveDate::from_ymd_opt(year, month, day).expect("valid test date");
    CycleId::new(date, hour).expect("valid test cycle")
}

/// A temporary directory for a cache root.
pub fn temp_cache_root() -> TempDir {
    tempfile::tempdir().expect("create temp dir")
}
