//! Transparency scoring.
//!
//! A [`ScoreTable`] maps binned cloud cover, humidity and aerosol optical
//! depth to a 0..=100 score. The [`ScoreEngine`] applies it to every cell of
//! every hour and adds the astronomical context from [`ephemeris`]: darkness,
//! Moon altitude and illumination, and Milky Way core visibility.
//!
//! [`grade`] holds the per-location ratings used when a night is summarised
//! into a single letter grade.

pub mod engine;
pub mod ephemeris;
pub mod error;
pub mod grade;
pub mod score_table;

pub use engine::{EngineConfig, ScoreEngine};
pub use ephemeris::{new_moon_dates, AstroContext, Equatorial};
pub use error::{Result, ScoringError};
pub use grade::{
    is_moon_free, light_pollution_score, nightly_grade, transparency_class, HourRating,
    NightGrade, RatingTable,
};
pub use score_table::{BinScheme, ScoreTable};
