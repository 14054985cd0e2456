//! Cycles used to build the climatology from archived analyses.

use chrono::{Datelike, NaiveDate};
use sky_common::CycleId;

use crate::error::{check_month, ClimatologyError, Result};

/// First year the archive can be assumed to hold every field.
pub const MIN_ARCHIVE_YEAR: i32 = 2021;

/// Analysis hour sampled for every archived day.
pub const ARCHIVE_CYCLE_HOUR: u8 = 12;

/// The 12z cycles of every day of `month` in `[start_year, end_year)`.
pub fn archive_cycles(start_year: i32, end_year: i32, month: u32) -> Result<Vec<CycleId>> {
    check_month(month)?;
    if start_year < MIN_ARCHIVE_YEAR || end_year < MIN_ARCHIVE_YEAR {
        return Err(ClimatologyError::InvalidYears(format!(
            "years must be at least {} (got {}..{})",
            MIN_ARCHIVE_YEAR, start_year, end_year
        )));
    }
    if start_year >= end_year {
        return Err(ClimatologyError::InvalidYears(format!(
            "end year {} must be after start year {}",
            end_year, start_year
        )));
    }

    let mut cycles = Vec::new();
    for year in start_year..end_year {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            continue;
        };
        for date in first.iter_days().take_while(|d| d.month() == month) {
            cycles.push(CycleId::new(date, ARCHIVE_CYCLE_HOUR)?);
        }
    }
    Ok(cycles)
}
