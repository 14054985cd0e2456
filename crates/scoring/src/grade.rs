//! Hourly ratings and nightly grades for a single location.
//!
//! Ratings combine the transparency score with the light pollution of the
//! site and whether the Moon is up. A night's hourly ratings reduce to a
//! letter grade.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoringError};

const BUILTIN_RATINGS: &str = include_str!("../data/rating_table.json");

/// Light pollution levels indexed by the rating table.
pub const LIGHT_POLLUTION_LEVELS: usize = 4;

/// Transparency classes, 1 (poor) to 5 (excellent).
pub const TRANSPARENCY_CLASSES: usize = 5;

/// Minimum number of rated hours for a nightly grade.
pub const MIN_GRADED_HOURS: usize = 5;

/// Light pollution level 0 (pristine) to 3 (urban) for a Bortle class.
/// Class 0 means unknown.
pub fn light_pollution_score(bortle: u8) -> Option<u8> {
    match bortle {
        0 => None,
        1 => Some(0),
        2..=4 => Some(1),
        5 => Some(2),
        _ => Some(3),
    }
}

/// Transparency class 1..=5 for a 0..=100 score.
pub fn transparency_class(score: u8) -> u8 {
    match score {
        80..=u8::MAX => 5,
        60..=79 => 4,
        40..=59 => 3,
        20..=39 => 2,
        _ => 1,
    }
}

/// The Moon counts as absent only when it is below the horizon at both ends
/// of the hour.
pub fn is_moon_free(altitude_at_start: f64, altitude_at_end: f64) -> bool {
    altitude_at_start <= 0.0 && altitude_at_end <= 0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HourRating {
    Poor = 1,
    Average = 2,
    Good = 3,
    Excellent = 4,
}

impl HourRating {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(HourRating::Poor),
            2 => Some(HourRating::Average),
            3 => Some(HourRating::Good),
            4 => Some(HourRating::Excellent),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawRatings {
    ratings: Vec<Vec<u8>>,
}

/// `[light pollution][transparency] -> rating`, transparency indexed from
/// excellent (0) to poor (4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingTable {
    ratings: [[HourRating; TRANSPARENCY_CLASSES]; LIGHT_POLLUTION_LEVELS],
}

impl RatingTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_RATINGS)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawRatings = serde_json::from_str(text)?;
        if raw.ratings.len() != LIGHT_POLLUTION_LEVELS {
            return Err(ScoringError::InvalidRating(format!(
                "expected {} light pollution rows, found {}",
                LIGHT_POLLUTION_LEVELS,
                raw.ratings.len()
            )));
        }
        let mut ratings = [[HourRating::Poor; TRANSPARENCY_CLASSES]; LIGHT_POLLUTION_LEVELS];
        for (lp, row) in raw.ratings.iter().enumerate() {
            if row.len() != TRANSPARENCY_CLASSES {
                return Err(ScoringError::InvalidRating(format!(
                    "row {}: expected {} transparency columns, found {}",
                    lp,
                    TRANSPARENCY_CLASSES,
                    row.len()
                )));
            }
            for (t, &value) in row.iter().enumerate() {
                ratings[lp][t] = HourRating::from_u8(value).ok_or_else(|| {
                    ScoringError::InvalidRating(format!("rating {} is outside 1..=4", value))
                })?;
            }
        }
        Ok(Self { ratings })
    }

    /// Rating of one hour. A visible Moon always rates poor.
    pub fn hour_rating(&self, moon_free: bool, light_pollution: u8, score: u8) -> HourRating {
        if !moon_free {
            return HourRating::Poor;
        }
        let lp = (light_pollution as usize).min(LIGHT_POLLUTION_LEVELS - 1);
        let column = TRANSPARENCY_CLASSES - transparency_class(score) as usize;
        self.ratings[lp][column]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NightGrade {
    S,
    A,
    B,
    C,
}

impl fmt::Display for NightGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NightGrade::S => "S",
            NightGrade::A => "A",
            NightGrade::B => "B",
            NightGrade::C => "C",
        };
        f.write_str(s)
    }
}

/// Grade a night from its hourly ratings; `None` below five hours.
///
/// S needs three excellent hours, A three good-or-better hours and B five
/// average-or-better hours.
pub fn nightly_grade(ratings: &[HourRating]) -> Option<NightGrade> {
    if ratings.len() < MIN_GRADED_HOURS {
        return None;
    }
    let at_least = |floor: HourRating| ratings.iter().filter(|&&r| r >= floor).count();

    let grade = if at_least(HourRating::Excellent) >= 3 {
        NightGrade::S
    } else if at_least(HourRating::Good) >= 3 {
        NightGrade::A
    } else if at_least(HourRating::Average) >= 5 {
        NightGrade::B
    } else {
        NightGrade::C
    };
    Some(grade)
}
