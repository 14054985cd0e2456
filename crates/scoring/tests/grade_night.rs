//! Grading a night at one location from scored hours.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use scoring::{
    is_moon_free, light_pollution_score, nightly_grade, AstroContext, EngineConfig, NightGrade,
    RatingTable, ScoreEngine, ScoreTable,
};
use sky_common::{CanonicalGrid, HourFields, RawFieldArray, Variable};

fn clear_sky(hour: u32) -> HourFields {
    HourFields {
        valid_hour: hour,
        cloud_cover: RawFieldArray::new(Variable::CloudCover, hour, 1, 1, vec![2.0]).unwrap(),
        humidity: RawFieldArray::new(Variable::RelativeHumidity, hour, 1, 1, vec![15.0]).unwrap(),
        aod: RawFieldArray::new(Variable::AerosolOpticalDepth, hour, 1, 1, vec![0.04]).unwrap(),
    }
}

#[test]
fn test_clear_moonless_night_grades_s() {
    // New moon 2024-06-06; a dark site in the Atacama.
    let (lat, lng) = (-24.0, 290.0);
    let grid = CanonicalGrid::regular(lat, lng, 1.0, 1, 1);
    let engine = ScoreEngine::new(
        Arc::new(ScoreTable::builtin().unwrap()),
        Arc::new(grid),
        EngineConfig::default(),
    );
    let ratings_table = RatingTable::builtin().unwrap();
    let lp = light_pollution_score(1).unwrap();

    let start = Utc.with_ymd_and_hms(2024, 6, 6, 2, 0, 0).unwrap();
    let mut ratings = Vec::new();
    for h in 0..8u32 {
        let instant = start + Duration::hours(h as i64);
        let records = engine.score_hour(&clear_sky(h), instant).unwrap();
        assert_eq!(records.dark[0], 1, "hour {h} should be dark");

        let end = AstroContext::for_instant(instant + Duration::hours(1));
        let moon_free = is_moon_free(records.moon_altitude[0] as f64, end.moon_altitude(lat, lng));
        let score = records.score_at(0).unwrap();
        ratings.push(ratings_table.hour_rating(moon_free, lp, score));
    }

    assert_eq!(nightly_grade(&ratings), Some(NightGrade::S));
}
