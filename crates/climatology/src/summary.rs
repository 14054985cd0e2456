//! Read side: monthly statistics joined with the static reference tables.

use std::sync::{Arc, OnceLock};

use chrono::{Datelike, NaiveDate};
use scoring::new_moon_dates;
use serde::Serialize;
use sky_common::{CanonicalGrid, CommonError, HistoricalRecord};

use crate::bortle::BortleTable;
use crate::error::{check_month, Result};
use crate::history::HistoryStore;
use crate::meteor::{MeteorShower, MeteorShowerTable};
use crate::season::{core_max_altitude, season_by_row};

/// Everything the historical view shows for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSummary {
    pub lat: f64,
    pub lng: f64,
    /// January first.
    pub months: Vec<HistoricalRecord>,
    pub bortle_class: Option<u8>,
    pub core_max_altitude: f64,
    pub new_moon_dates: Vec<NaiveDate>,
    pub next_meteor_shower: Option<MeteorShower>,
}

pub struct Climatology {
    grid: Arc<CanonicalGrid>,
    history: HistoryStore,
    bortle: BortleTable,
    showers: MeteorShowerTable,
    seasons: [OnceLock<Vec<bool>>; 12],
}

impl Climatology {
    pub fn new(
        grid: Arc<CanonicalGrid>,
        history: HistoryStore,
        bortle: BortleTable,
        showers: MeteorShowerTable,
    ) -> Self {
        Self {
            grid,
            history,
            bortle,
            showers,
            seasons: Default::default(),
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn showers(&self) -> &MeteorShowerTable {
        &self.showers
    }

    fn check_cell(&self, cell: usize) -> Result<()> {
        if cell >= self.grid.len() {
            return Err(CommonError::DimensionMismatch {
                expected: self.grid.len(),
                actual: cell,
            }
            .into());
        }
        Ok(())
    }

    fn in_season(&self, cell: usize, month: u32) -> Result<bool> {
        let slot = &self.seasons[(month - 1) as usize];
        let rows = match slot.get() {
            Some(rows) => rows,
            None => {
                let rows = season_by_row(&self.grid, month)?;
                slot.get_or_init(|| rows)
            }
        };
        Ok(rows[cell / self.grid.width()])
    }

    pub async fn record(&self, cell: usize, month: u32) -> Result<HistoricalRecord> {
        check_month(month)?;
        self.check_cell(cell)?;
        let acc = self.history.load(month).await?;
        Ok(HistoricalRecord {
            mean_transparency_score: acc.mean(cell),
            sample_count: acc.count(cell),
            bortle_class: self.bortle.class(cell),
            milky_way_season: self.in_season(cell, month)?,
        })
    }

    /// All twelve months for a cell, with the year's new moons and the next
    /// meteor shower relative to `today`.
    pub async fn month_summary(&self, cell: usize, today: NaiveDate) -> Result<MonthSummary> {
        self.check_cell(cell)?;
        let mut months = Vec::with_capacity(12);
        for month in 1..=12 {
            months.push(self.record(cell, month).await?);
        }
        let (lat, lng) = self.grid.coords(cell);
        Ok(MonthSummary {
            lat,
            lng,
            months,
            bortle_class: self.bortle.class(cell),
            core_max_altitude: core_max_altitude(lat),
            new_moon_dates: new_moon_dates(today.year()),
            next_meteor_shower: self.showers.next_after(today).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sky_common::HourRecords;

    fn hour(scores: Vec<u8>) -> HourRecords {
        let n = scores.len();
        HourRecords {
            valid_hour: 0,
            cloud_cover: vec![0.0; n],
            humidity: vec![0.0; n],
            aod: vec![0.0; n],
            score: scores,
            dark: vec![0; n],
            moon_altitude: vec![0.0; n],
            milky_way: vec![0; n],
            moon_illumination: 0.0,
        }
    }

    #[tokio::test]
    async fn test_summary_joins_tables() {
        let dir = tempfile::tempdir().unwrap();
        // Rows at 40 and -40, two columns each.
        let grid = Arc::new(CanonicalGrid::regular(40.0, 0.0, 80.0, 2, 2));
        let history = HistoryStore::new(dir.path(), 4);
        history.fold_hour(&hour(vec![80, 60, 40, 20]), 7).await.unwrap();
        let bortle = BortleTable::from_bytes(vec![2, 0, 5, 9], 4).unwrap();
        let clim = Climatology::new(grid, history, bortle, MeteorShowerTable::builtin().unwrap());

        let july = clim.record(2, 7).await.unwrap();
        assert_eq!(july.mean_transparency_score, Some(40.0));
        assert_eq!(july.sample_count, 1);
        assert_eq!(july.bortle_class, Some(5));
        assert!(july.milky_way_season);

        let summary = clim
            .month_summary(0, NaiveDate::from_ymd_opt(2024, 7, 20).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.months.len(), 12);
        assert_eq!(summary.months[0].sample_count, 0);
        assert_eq!(summary.months[6].mean_transparency_score, Some(80.0));
        assert!(!summary.months[11].milky_way_season);
        assert_eq!(summary.new_moon_dates.len(), 13);
        assert_eq!(summary.next_meteor_shower.unwrap().name, "Southern delta Aquarids");
        assert_eq!(summary.lat, 40.0);
    }

    #[tokio::test]
    async fn test_out_of_grid_cell() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Arc::new(CanonicalGrid::regular(0.0, 0.0, 1.0, 1, 1));
        let clim = Climatology::new(
            grid,
            HistoryStore::new(dir.path(), 1),
            BortleTable::unknown(1),
            MeteorShowerTable::builtin().unwrap(),
        );
        assert!(clim.record(1, 1).await.is_err());
        assert!(clim.record(0, 13).await.is_err());
        assert_eq!(clim.record(0, 1).await.unwrap().bortle_class, None);
    }
}
