//! Reduction of ensemble members to a single field.

use serde::{Deserialize, Serialize};

/// How ensemble members are combined per cell.
///
/// NaN members are ignored. A cell with no finite member stays NaN.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleReduction {
    #[default]
    Mean,
    Median,
    /// Fraction of members strictly below the threshold, in 0..=1.
    ProbabilityBelow(f32),
}

impl EnsembleReduction {
    /// Reduce equally sized member arrays. A single member is returned as is.
    pub fn reduce(&self, members: &[Vec<f32>]) -> Vec<f32> {
        match members {
            [] => Vec::new(),
            [only] if !matches!(self, EnsembleReduction::ProbabilityBelow(_)) => only.clone(),
            _ => {
                let len = members.iter().map(Vec::len).min().unwrap_or(0);
                let mut scratch = Vec::with_capacity(members.len());
                (0..len)
                    .map(|cell| {
                        scratch.clear();
                        scratch.extend(
                            members
                                .iter()
                                .map(|m| m[cell])
                                .filter(|v| !v.is_nan()),
                        );
                        self.reduce_cell(&mut scratch)
                    })
                    .collect()
            }
        }
    }

    fn reduce_cell(&self, values: &mut [f32]) -> f32 {
        if values.is_empty() {
            return f32::NAN;
        }
        let n = values.len() as f64;
        match *self {
            EnsembleReduction::Mean => {
                (values.iter().map(|&v| v as f64).sum::<f64>() / n) as f32
            }
            EnsembleReduction::Median => {
                values.sort_by(f32::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[mid]
                } else {
                    ((values[mid - 1] as f64 + values[mid] as f64) / 2.0) as f32
                }
            }
            EnsembleReduction::ProbabilityBelow(threshold) => {
                let below = values.iter().filter(|&&v| v < threshold).count();
                (below as f64 / n) as f32
            }
        }
    }
}

impl std::fmt::Display for EnsembleReduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnsembleReduction::Mean => write!(f, "mean"),
            EnsembleReduction::Median => write!(f, "median"),
            EnsembleReduction::ProbabilityBelow(t) => write!(f, "p(<{})", t),
        }
    }
}
