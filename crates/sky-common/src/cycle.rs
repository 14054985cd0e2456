//! Forecast cycle identity and lifecycle status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Hours at which forecast runs are initialised.
pub const SYNOPTIC_HOURS: [u8; 4] = [0, 6, 12, 18];

/// One forecast run: the date and synoptic hour of its analysis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleId {
    date: NaiveDate,
    hour: u8,
}

impl CycleId {
    pub fn new(date: NaiveDate, hour: u8) -> CommonResult<Self> {
        if !SYNOPTIC_HOURS.contains(&hour) {
            return Err(CommonError::InvalidCycle(format!(
                "cycle hour must be one of 00, 06, 12, 18 (got {:02})",
                hour
            )));
        }
        Ok(Self { date, hour })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Run date as `YYYYMMDD`, the form used in source paths.
    pub fn date_str(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Cache key `YYYYMMDDHH`.
    pub fn key(&self) -> String {
        format!("{}{:02}", self.date_str(), self.hour)
    }

    pub fn parse_key(key: &str) -> CommonResult<Self> {
        if key.len() != 10 || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CommonError::InvalidCycle(format!(
                "expected YYYYMMDDHH, got '{}'",
                key
            )));
        }
        let date = NaiveDate::parse_from_str(&key[..8], "%Y%m%d")
            .map_err(|e| CommonError::InvalidCycle(format!("{}: {}", key, e)))?;
        let hour: u8 = key[8..]
            .parse()
            .map_err(|_| CommonError::InvalidCycle(key.to_string()))?;
        Self::new(date, hour)
    }

    /// Analysis time of the run.
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &self
                .date
                .and_hms_opt(self.hour as u32, 0, 0)
                .unwrap_or_default(),
        )
    }

    /// Instant a forecast hour of this run is valid for.
    pub fn valid_time(&self, forecast_hour: u32) -> DateTime<Utc> {
        self.issued_at() + Duration::hours(forecast_hour as i64)
    }

    /// Most recent cycle expected to be fully published upstream at `now`,
    /// given that runs appear `delay_hours` after their analysis time.
    pub fn latest_available(now: DateTime<Utc>, delay_hours: u32) -> Self {
        let adjusted = now - Duration::hours(delay_hours as i64);
        let hour = (adjusted.hour() / 6 * 6) as u8;
        Self {
            date: adjusted.date_naive(),
            hour,
        }
    }

    pub fn previous(&self) -> Self {
        let t = self.issued_at() - Duration::hours(6);
        Self {
            date: t.date_naive(),
            hour: t.hour() as u8,
        }
    }

    pub fn next(&self) -> Self {
        let t = self.issued_at() + Duration::hours(6);
        Self {
            date: t.date_naive(),
            hour: t.hour() as u8,
        }
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for CycleId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_key(s)
    }
}

/// Which family of forecast files a field comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Single high-resolution run, hourly lead times (cloud, humidity).
    Deterministic,
    /// Ensemble product, 3-hourly lead times (aerosol).
    Ensemble,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Deterministic => "deterministic",
            SourceKind::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one cycle through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Pending,
    Fetching,
    Extracting,
    Scoring,
    Published,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Pending => "pending",
            CycleStatus::Fetching => "fetching",
            CycleStatus::Extracting => "extracting",
            CycleStatus::Scoring => "scoring",
            CycleStatus::Published => "published",
            CycleStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleStatus::Published | CycleStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            CycleStatus::Fetching | CycleStatus::Extracting | CycleStatus::Scoring
        )
    }

    pub fn can_transition_to(&self, next: CycleStatus) -> bool {
        use CycleStatus::*;
        match (self, next) {
            (Pending, Fetching)
            | (Fetching, Extracting)
            | (Extracting, Scoring)
            | (Scoring, Published) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Validated transition.
    pub fn transition(self, next: CycleStatus) -> CommonResult<CycleStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CommonError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl FromStr for CycleStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CycleStatus::Pending),
            "fetching" => Ok(CycleStatus::Fetching),
            "extracting" => Ok(CycleStatus::Extracting),
            "scoring" => Ok(CycleStatus::Scoring),
            "published" => Ok(CycleStatus::Published),
            "failed" => Ok(CycleStatus::Failed),
            other => Err(CommonError::InvalidCycle(format!(
                "unknown cycle status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cycle_key_round_trip() {
        let id = CycleId::new(date(2024, 3, 9), 6).unwrap();
        assert_eq!(id.key(), "2024030906");
        assert_eq!(id.to_string(), "2024030906");
        assert_eq!("2024030906".parse::<CycleId>().unwrap(), id);
    }

    #[test]
    fn test_cycle_rejects_non_synoptic_hour() {
        assert!(CycleId::new(date(2024, 3, 9), 3).is_err());
        assert!(CycleId::parse_key("2024030903").is_err());
        assert!(CycleId::parse_key("20240309").is_err());
        assert!(CycleId::parse_key("2024133100").is_err());
    }

    #[test]
    fn test_latest_available() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 3, 30, 0).unwrap();
        // 4 hours of upstream delay puts us back into the previous day's 18z
        let id = CycleId::latest_available(now, 4);
        assert_eq!(id.key(), "2024030818");

        let now = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(CycleId::latest_available(now, 4).key(), "2024030906");
    }

    #[test]
    fn test_previous_next_cross_midnight() {
        let id = CycleId::new(date(2024, 1, 1), 0).unwrap();
        assert_eq!(id.previous().key(), "2023123118");
        assert_eq!(id.previous().next(), id);
    }

    #[test]
    fn test_valid_time() {
        let id = CycleId::new(date(2024, 3, 9), 18).unwrap();
        let t = id.valid_time(30);
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_status_transitions() {
        use CycleStatus::*;
        assert!(Pending.can_transition_to(Fetching));
        assert!(Scoring.can_transition_to(Published));
        assert!(Fetching.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Published));
        assert!(!Published.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(Extracting.transition(Fetching).is_err());
        assert_eq!(Pending.transition(Fetching).unwrap(), Fetching);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            CycleStatus::Pending,
            CycleStatus::Fetching,
            CycleStatus::Extracting,
            CycleStatus::Scoring,
            CycleStatus::Published,
            CycleStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CycleStatus>().unwrap(), status);
        }
    }
}
