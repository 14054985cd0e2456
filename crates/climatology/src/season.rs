//! Milky Way visibility season.
//!
//! A month is in season for a latitude when the galactic core is above the
//! horizon at some point during astronomical darkness in the middle of the
//! month. Sun and core hour angles shift together with longitude, so the
//! answer only depends on latitude.

use chrono::{Duration, TimeZone, Utc};
use rayon::prelude::*;
use scoring::ephemeris::GALACTIC_CENTER_DEC_DEG;
use scoring::{AstroContext, EngineConfig};
use sky_common::CanonicalGrid;

use crate::error::{check_month, Result};

/// Year whose mid-month dates stand in for every year.
const REFERENCE_YEAR: i32 = 2024;
const SAMPLE_DAY: u32 = 15;
const STEP_MINUTES: i64 = 15;

/// Highest altitude the galactic core reaches at a latitude, degrees.
/// Negative when it never rises.
pub fn core_max_altitude(lat: f64) -> f64 {
    90.0 - (lat - GALACTIC_CENTER_DEC_DEG).abs()
}

pub fn milky_way_season(lat: f64, month: u32) -> Result<bool> {
    check_month(month)?;
    if core_max_altitude(lat) <= 0.0 {
        return Ok(false);
    }
    let Some(start) = Utc
        .with_ymd_and_hms(REFERENCE_YEAR, month, SAMPLE_DAY, 0, 0, 0)
        .single()
    else {
        return Ok(false);
    };
    let dark_limit = EngineConfig::default().dark_sun_altitude_deg;

    let steps = 24 * 60 / STEP_MINUTES;
    Ok((0..steps).any(|i| {
        let ctx = AstroContext::for_instant(start + Duration::minutes(i * STEP_MINUTES));
        ctx.sun_altitude(lat, 0.0) < dark_limit && ctx.core_altitude(lat, 0.0) > 0.0
    }))
}

/// Season flag for every latitude row of a grid.
pub fn season_by_row(grid: &CanonicalGrid, month: u32) -> Result<Vec<bool>> {
    check_month(month)?;
    grid.lats()
        .par_iter()
        .map(|&lat| milky_way_season(lat, month))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_max_altitude() {
        assert!((core_max_altitude(-26.1) - 90.0).abs() < 0.1);
        assert!(core_max_altitude(70.0) < 0.0);
    }

    #[test]
    fn test_mid_latitude_seasons() {
        assert!(milky_way_season(40.0, 7).unwrap());
        assert!(!milky_way_season(40.0, 12).unwrap());
        assert!(milky_way_season(-30.0, 6).unwrap());
    }

    #[test]
    fn test_core_never_rises_in_the_far_north() {
        assert!((1..=12).all(|m| !milky_way_season(80.0, m).unwrap()));
    }

    #[test]
    fn test_invalid_month() {
        assert!(milky_way_season(0.0, 13).is_err());
    }

    #[test]
    fn test_rows_follow_latitude() {
        let grid = CanonicalGrid::regular(80.0, 0.0, 40.0, 5, 2);
        let rows = season_by_row(&grid, 7).unwrap();
        // 80, 40, 0, -40, -80; the core is circumpolar at -80.
        assert_eq!(rows, vec![false, true, true, true, true]);
    }
}
