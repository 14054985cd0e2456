//! Scored output records.

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Sentinel stored in u8 score columns for a missing score.
pub const SCORE_MISSING: u8 = u8::MAX;

/// How well the galactic core can be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MilkyWayActivity {
    NotVisible = 0,
    Low = 1,
    High = 2,
}

impl MilkyWayActivity {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MilkyWayActivity::NotVisible),
            1 => Some(MilkyWayActivity::Low),
            2 => Some(MilkyWayActivity::High),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Everything known about one cell at one valid hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub cloud_cover: Option<f32>,
    pub humidity: Option<f32>,
    pub aod: Option<f32>,
    pub transparency_score: Option<u8>,
    pub dark_hour: bool,
    pub moon_illumination: f32,
    pub moon_altitude: f32,
    pub milky_way: MilkyWayActivity,
}

/// Columnar records for every cell of one valid hour.
///
/// All per-cell columns have the grid's cell count. Moon illumination does
/// not vary across the globe at a given instant, so it is stored once.
#[derive(Debug, Clone, PartialEq)]
pub struct HourRecords {
    pub valid_hour: u32,
    pub cloud_cover: Vec<f32>,
    pub humidity: Vec<f32>,
    pub aod: Vec<f32>,
    pub score: Vec<u8>,
    pub dark: Vec<u8>,
    pub moon_altitude: Vec<f32>,
    pub milky_way: Vec<u8>,
    pub moon_illumination: f32,
}

impl HourRecords {
    pub fn cell_count(&self) -> usize {
        self.score.len()
    }

    /// Check every column has `cells` entries and every score is in range.
    pub fn validate(&self, cells: usize) -> CommonResult<()> {
        let lens = [
            self.cloud_cover.len(),
            self.humidity.len(),
            self.aod.len(),
            self.score.len(),
            self.dark.len(),
            self.moon_altitude.len(),
            self.milky_way.len(),
        ];
        if let Some(&actual) = lens.iter().find(|&&len| len != cells) {
            return Err(CommonError::DimensionMismatch {
                expected: cells,
                actual,
            });
        }
        if let Some(&bad) = self
            .score
            .iter()
            .find(|&&s| s > 100 && s != SCORE_MISSING)
        {
            return Err(CommonError::ScoreOutOfRange(bad));
        }
        Ok(())
    }

    pub fn score_at(&self, cell: usize) -> Option<u8> {
        self.score.get(cell).copied().filter(|&s| s != SCORE_MISSING)
    }

    pub fn record(&self, cell: usize) -> Option<ForecastRecord> {
        if cell >= self.cell_count() {
            return None;
        }
        let opt = |v: f32| if v.is_nan() { None } else { Some(v) };
        Some(ForecastRecord {
            cloud_cover: opt(self.cloud_cover[cell]),
            humidity: opt(self.humidity[cell]),
            aod: opt(self.aod[cell]),
            transparency_score: self.score_at(cell),
            dark_hour: self.dark[cell] != 0,
            moon_illumination: self.moon_illumination,
            moon_altitude: self.moon_altitude[cell],
            milky_way: MilkyWayActivity::from_u8(self.milky_way[cell])
                .unwrap_or(MilkyWayActivity::NotVisible),
        })
    }
}

/// Long-term statistics for one cell and calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub mean_transparency_score: Option<f64>,
    pub sample_count: u32,
    pub bortle_class: Option<u8>,
    pub milky_way_season: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cells: usize) -> HourRecords {
        HourRecords {
            valid_hour: 0,
            cloud_cover: vec![10.0; cells],
            humidity: vec![f32::NAN; cells],
            aod: vec![0.05; cells],
            score: vec![SCORE_MISSING; cells],
            dark: vec![1; cells],
            moon_altitude: vec![-12.5; cells],
            milky_way: vec![2; cells],
            moon_illumination: 0.4,
        }
    }

    #[test]
    fn test_record_materialises_missing() {
        let hour = sample(4);
        let rec = hour.record(2).unwrap();
        assert_eq!(rec.cloud_cover, Some(10.0));
        assert_eq!(rec.humidity, None);
        assert_eq!(rec.transparency_score, None);
        assert!(rec.dark_hour);
        assert_eq!(rec.milky_way, MilkyWayActivity::High);
        assert!(hour.record(4).is_none());
    }

    #[test]
    fn test_validate() {
        let mut hour = sample(4);
        assert!(hour.validate(4).is_ok());
        assert!(hour.validate(5).is_err());
        hour.score[1] = 101;
        assert!(hour.validate(4).is_err());
        hour.score[1] = 100;
        assert!(hour.validate(4).is_ok());
    }
}
