//! Lookup table mapping binned weather conditions to a transparency score.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoringError};

/// Table shipped with the crate; used unless a deployment overrides it.
const BUILTIN_TABLE: &str = include_str!("../data/score_table.json");

/// Ascending inner bin edges per axis.
///
/// A value falls in bin `k` when exactly `k` edges are less than or equal to
/// it, so edges `[20, 40]` give the bins `[.., 20) [20, 40) [40, ..]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinScheme {
    pub cloud_cover: Vec<f32>,
    pub humidity: Vec<f32>,
    pub aod: Vec<f32>,
}

impl BinScheme {
    /// (cloud, humidity, aod) bin counts.
    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.cloud_cover.len() + 1,
            self.humidity.len() + 1,
            self.aod.len() + 1,
        )
    }

    fn validate(&self) -> Result<()> {
        for (name, edges) in [
            ("cloud_cover", &self.cloud_cover),
            ("humidity", &self.humidity),
            ("aod", &self.aod),
        ] {
            if edges.iter().any(|e| !e.is_finite()) {
                return Err(ScoringError::InvalidTable(format!(
                    "{} edges must be finite",
                    name
                )));
            }
            if edges.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ScoringError::InvalidTable(format!(
                    "{} edges must be strictly ascending",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn bin(edges: &[f32], value: f32) -> usize {
    edges.partition_point(|&e| e <= value)
}

#[derive(Deserialize)]
struct RawTable {
    bins: BinScheme,
    scores: Vec<Vec<Vec<u16>>>,
}

/// Immutable `[cloud][humidity][aod] -> score` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    bins: BinScheme,
    scores: Vec<u8>,
}

impl ScoreTable {
    /// The table bundled with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ScoringError::TableRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawTable = serde_json::from_str(text)?;
        raw.bins.validate()?;

        let (nc, nh, na) = raw.bins.shape();
        if raw.scores.len() != nc {
            return Err(ScoringError::InvalidTable(format!(
                "expected {} cloud bins, found {}",
                nc,
                raw.scores.len()
            )));
        }

        let mut scores = Vec::with_capacity(nc * nh * na);
        for (c, plane) in raw.scores.iter().enumerate() {
            if plane.len() != nh {
                return Err(ScoringError::InvalidTable(format!(
                    "cloud bin {}: expected {} humidity bins, found {}",
                    c,
                    nh,
                    plane.len()
                )));
            }
            for (h, row) in plane.iter().enumerate() {
                if row.len() != na {
                    return Err(ScoringError::InvalidTable(format!(
                        "cloud bin {}, humidity bin {}: expected {} aod bins, found {}",
                        c,
                        h,
                        na,
                        row.len()
                    )));
                }
                for &value in row {
                    if value > 100 {
                        return Err(ScoringError::InvalidTable(format!(
                            "score {} is outside 0..=100",
                            value
                        )));
                    }
                    scores.push(value as u8);
                }
            }
        }

        Ok(Self {
            bins: raw.bins,
            scores,
        })
    }

    pub fn bins(&self) -> &BinScheme {
        &self.bins
    }

    /// Score for one cell. Any missing input gives `None`.
    pub fn score(&self, cloud: Option<f32>, humidity: Option<f32>, aod: Option<f32>) -> Option<u8> {
        let (cloud, humidity, aod) = (cloud?, humidity?, aod?);
        if cloud.is_nan() || humidity.is_nan() || aod.is_nan() {
            return None;
        }
        let (_, nh, na) = self.bins.shape();
        let c = bin(&self.bins.cloud_cover, cloud);
        let h = bin(&self.bins.humidity, humidity);
        let a = bin(&self.bins.aod, aod);
        self.scores.get((c * nh + h) * na + a).copied()
    }

    /// Score straight from raw column values, NaN meaning missing.
    pub fn score_raw(&self, cloud: f32, humidity: f32, aod: f32) -> Option<u8> {
        self.score(Some(cloud), Some(humidity), Some(aod))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = ScoreTable::builtin().unwrap();
        assert_eq!(table.bins().shape(), (3, 3, 3));
        assert_eq!(table.score(Some(0.0), Some(0.0), Some(0.0)), Some(100));
        assert_eq!(table.score(Some(100.0), Some(100.0), Some(5.0)), Some(0));
    }

    #[test]
    fn test_bin_edges_are_lower_inclusive() {
        let table = ScoreTable::builtin().unwrap();
        assert_eq!(table.score(Some(19.99), Some(0.0), Some(0.0)), Some(100));
        assert_eq!(table.score(Some(20.0), Some(0.0), Some(0.0)), Some(60));
        assert_eq!(table.score(Some(40.0), Some(0.0), Some(0.0)), Some(20));
        assert_eq!(table.score(Some(0.0), Some(0.0), Some(0.1)), Some(90));
        assert_eq!(table.score(Some(0.0), Some(0.0), Some(0.3)), Some(75));
    }

    #[test]
    fn test_missing_input_is_missing_score() {
        let table = ScoreTable::builtin().unwrap();
        assert_eq!(table.score(None, Some(10.0), Some(0.1)), None);
        assert_eq!(table.score(Some(10.0), None, Some(0.1)), None);
        assert_eq!(table.score_raw(10.0, 10.0, f32::NAN), None);
    }

    #[test]
    fn test_every_score_in_range() {
        let table = ScoreTable::builtin().unwrap();
        for c in [0.0, 10.0, 25.0, 55.0, 100.0] {
            for h in [0.0, 30.0, 99.0] {
                for a in [0.0, 0.2, 3.0] {
                    let s = table.score_raw(c, h, a).unwrap();
                    assert!(s <= 100);
                }
            }
        }
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let json = r#"{"bins": {"cloud_cover": [], "humidity": [], "aod": []}, "scores": [[[101]]]}"#;
        assert!(matches!(
            ScoreTable::from_json(json),
            Err(ScoringError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let json = r#"{"bins": {"cloud_cover": [50], "humidity": [], "aod": []}, "scores": [[[10]]]}"#;
        assert!(ScoreTable::from_json(json).is_err());

        let json = r#"{"bins": {"cloud_cover": [50, 20], "humidity": [], "aod": []}, "scores": [[[1]], [[2]], [[3]]]}"#;
        assert!(ScoreTable::from_json(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        std::fs::write(
            &path,
            r#"{"bins": {"cloud_cover": [50], "humidity": [], "aod": []}, "scores": [[[80]], [[30]]]}"#,
        )
        .unwrap();
        let table = ScoreTable::load(&path).unwrap();
        assert_eq!(table.score_raw(10.0, 99.0, 9.0), Some(80));
        assert_eq!(table.score_raw(60.0, 99.0, 9.0), Some(30));
        assert!(ScoreTable::load(&dir.path().join("absent.json")).is_err());
    }
}
