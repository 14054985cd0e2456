//! Per-cell scoring of extracted fields.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sky_common::{
    CanonicalGrid, CycleId, HourFields, HourRecords, MilkyWayActivity, SCORE_MISSING,
};
use tracing::{debug, info, instrument};

use crate::ephemeris::{topocentric_altitude, AstroContext, Equatorial};
use crate::error::Result;
use crate::score_table::ScoreTable;

const DEG: f64 = std::f64::consts::PI / 180.0;

/// Thresholds for darkness and Milky Way visibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The Sun must be below this altitude for an hour to count as dark.
    pub dark_sun_altitude_deg: f64,
    /// Core altitude from which Milky Way activity counts as high.
    pub milky_way_high_altitude_deg: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dark_sun_altitude_deg: -18.0,
            milky_way_high_altitude_deg: 20.0,
        }
    }
}

/// Per-column `cos(hour angle)` of one body for the current instant.
///
/// The hour angle depends only on longitude, so each column is computed once
/// and every row reuses it.
struct BodyColumns {
    sin_dec: f64,
    cos_dec: f64,
    cos_hour_angle: Vec<f64>,
}

impl BodyColumns {
    fn new(body: &Equatorial, gmst: f64, lngs: &[f64]) -> Self {
        Self {
            sin_dec: (body.dec * DEG).sin(),
            cos_dec: (body.dec * DEG).cos(),
            cos_hour_angle: lngs
                .iter()
                .map(|lng| ((gmst + lng - body.ra) * DEG).cos())
                .collect(),
        }
    }

    fn altitude(&self, sin_lat: f64, cos_lat: f64, col: usize) -> f64 {
        let sin_alt = sin_lat * self.sin_dec + cos_lat * self.cos_dec * self.cos_hour_angle[col];
        sin_alt.clamp(-1.0, 1.0).asin() / DEG
    }
}

struct RowOut {
    score: Vec<u8>,
    dark: Vec<u8>,
    moon_altitude: Vec<f32>,
    milky_way: Vec<u8>,
}

/// Turns extracted fields into scored hour records.
pub struct ScoreEngine {
    table: Arc<ScoreTable>,
    grid: Arc<CanonicalGrid>,
    config: EngineConfig,
}

impl ScoreEngine {
    pub fn new(table: Arc<ScoreTable>, grid: Arc<CanonicalGrid>, config: EngineConfig) -> Self {
        Self {
            table,
            grid,
            config,
        }
    }

    pub fn grid(&self) -> &CanonicalGrid {
        &self.grid
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn milky_way(&self, dark: bool, core_altitude: f64) -> MilkyWayActivity {
        if !dark || core_altitude <= 0.0 {
            MilkyWayActivity::NotVisible
        } else if core_altitude < self.config.milky_way_high_altitude_deg {
            MilkyWayActivity::Low
        } else {
            MilkyWayActivity::High
        }
    }

    /// Score every cell of one valid hour.
    pub fn score_hour(&self, fields: &HourFields, instant: DateTime<Utc>) -> Result<HourRecords> {
        let width = self.grid.width();
        let height = self.grid.height();
        fields.validate(width, height)?;

        let ctx = AstroContext::for_instant(instant);
        let lngs = self.grid.lngs();
        let sun = BodyColumns::new(&ctx.sun, ctx.gmst, lngs);
        let moon = BodyColumns::new(&ctx.moon, ctx.gmst, lngs);
        let core = BodyColumns::new(&AstroContext::galactic_center(), ctx.gmst, lngs);

        let cloud = &fields.cloud_cover.values;
        let humidity = &fields.humidity.values;
        let aod = &fields.aod.values;

        let rows: Vec<RowOut> = self
            .grid
            .lats()
            .par_iter()
            .enumerate()
            .map(|(row, &lat)| {
                let (sin_lat, cos_lat) = (lat * DEG).sin_cos();
                let mut out = RowOut {
                    score: Vec::with_capacity(width),
                    dark: Vec::with_capacity(width),
                    moon_altitude: Vec::with_capacity(width),
                    milky_way: Vec::with_capacity(width),
                };
                for col in 0..width {
                    let cell = row * width + col;
                    let score = self
                        .table
                        .score_raw(cloud[cell], humidity[cell], aod[cell])
                        .unwrap_or(SCORE_MISSING);

                    let dark = sun.altitude(sin_lat, cos_lat, col) < self.config.dark_sun_altitude_deg;
                    let moon_alt = topocentric_altitude(
                        moon.altitude(sin_lat, cos_lat, col),
                        ctx.moon_parallax,
                    );
                    let activity = self.milky_way(dark, core.altitude(sin_lat, cos_lat, col));

                    out.score.push(score);
                    out.dark.push(dark as u8);
                    out.moon_altitude.push(moon_alt as f32);
                    out.milky_way.push(activity.as_u8());
                }
                out
            })
            .collect();

        let cells = width * height;
        let mut records = HourRecords {
            valid_hour: fields.valid_hour,
            cloud_cover: cloud.clone(),
            humidity: humidity.clone(),
            aod: aod.clone(),
            score: Vec::with_capacity(cells),
            dark: Vec::with_capacity(cells),
            moon_altitude: Vec::with_capacity(cells),
            milky_way: Vec::with_capacity(cells),
            moon_illumination: ctx.moon_illumination as f32,
        };
        for row in rows {
            records.score.extend(row.score);
            records.dark.extend(row.dark);
            records.moon_altitude.extend(row.moon_altitude);
            records.milky_way.extend(row.milky_way);
        }
        records.validate(cells)?;

        debug!(
            valid_hour = fields.valid_hour,
            scored = records.score.iter().filter(|&&s| s != SCORE_MISSING).count(),
            moon_illumination = records.moon_illumination,
            "Scored hour"
        );
        Ok(records)
    }

    /// Score every extracted hour of a cycle, in order.
    #[instrument(skip(self, hours), fields(cycle = %cycle, hours = hours.len()))]
    pub fn score_cycle(&self, cycle: &CycleId, hours: &[HourFields]) -> Result<Vec<HourRecords>> {
        let records = hours
            .iter()
            .map(|fields| self.score_hour(fields, cycle.valid_time(fields.valid_hour)))
            .collect::<Result<Vec<_>>>()?;
        info!(hours = records.len(), "Cycle scored");
        Ok(records)
    }
}
