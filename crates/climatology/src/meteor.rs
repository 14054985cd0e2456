//! Calendar of major meteor showers.

use std::path::Path;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use scoring::AstroContext;
use serde::{Deserialize, Serialize};

use crate::error::{ClimatologyError, Result};

const BUILTIN_TABLE: &str = include_str!("../data/meteor_showers.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteorShower {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub peak: NaiveDate,
    /// UTC hour of maximum activity on the peak date.
    #[serde(default)]
    pub peak_hour: u32,
    pub max_hourly_rate: u32,
    /// Moon illuminated fraction (0..1) at the peak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moon_illumination: Option<f64>,
}

impl MeteorShower {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Showers sorted by peak date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteorShowerTable {
    #[serde(default)]
    pub source: String,
    pub year: i32,
    pub showers: Vec<MeteorShower>,
}

impl MeteorShowerTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut table: Self = serde_json::from_str(text)?;
        for shower in &table.showers {
            if shower.start > shower.end || shower.peak < shower.start || shower.peak > shower.end {
                return Err(ClimatologyError::ShowerPeriod(shower.name.clone()));
            }
        }
        table.showers.sort_by_key(|s| s.peak);
        Ok(table)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ClimatologyError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::from_json(&text)
    }

    /// The first shower peaking on or after `date`.
    pub fn next_after(&self, date: NaiveDate) -> Option<&MeteorShower> {
        let idx = self.showers.partition_point(|s| s.peak < date);
        self.showers.get(idx)
    }

    /// Showers whose activity period includes `date`.
    pub fn active_on(&self, date: NaiveDate) -> Vec<&MeteorShower> {
        self.showers.iter().filter(|s| s.is_active_on(date)).collect()
    }

    /// A copy with the Moon's illuminated fraction at every peak filled in.
    pub fn with_peak_moon_illumination(&self) -> Self {
        let mut table = self.clone();
        for shower in &mut table.showers {
            let midnight = Utc.from_utc_datetime(&shower.peak.and_time(chrono::NaiveTime::MIN));
            let instant = midnight + Duration::hours(shower.peak_hour.min(23) as i64);
            shower.moon_illumination = Some(AstroContext::for_instant(instant).moon_illumination);
        }
        table
    }
}
