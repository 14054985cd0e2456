//! Per-cell running mean of transparency scores for one calendar month.

use sky_common::SCORE_MISSING;
use storage::codec::{
    decode_frame, encode_frame, put_f64_column, put_u32_column, FrameKind, PayloadReader,
};

use crate::error::{check_month, ClimatologyError, Result};

/// Outcome of folding one cycle into an accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldReport {
    /// Cells whose mean moved.
    pub accepted: usize,
    /// Cells with no score for this cycle.
    pub missing: usize,
    /// Cells whose value could not be used.
    pub rejected: usize,
}

impl std::ops::AddAssign for FoldReport {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.missing += other.missing;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAccumulator {
    month: u32,
    mean: Vec<f64>,
    count: Vec<u32>,
}

impl MonthlyAccumulator {
    pub fn new(month: u32, cells: usize) -> Result<Self> {
        Ok(Self {
            month: check_month(month)?,
            mean: vec![0.0; cells],
            count: vec![0; cells],
        })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn cell_count(&self) -> usize {
        self.mean.len()
    }

    /// Running mean for a cell, `None` until it has a sample.
    pub fn mean(&self, cell: usize) -> Option<f64> {
        match self.count.get(cell) {
            Some(&n) if n > 0 => Some(self.mean[cell]),
            _ => None,
        }
    }

    pub fn count(&self, cell: usize) -> u32 {
        self.count.get(cell).copied().unwrap_or(0)
    }

    /// Add one sample to one cell. Returns `false` when the sample is not a
    /// valid score or the cell is saturated.
    pub fn add(&mut self, cell: usize, value: f64) -> bool {
        if !(0.0..=100.0).contains(&value) || cell >= self.mean.len() {
            return false;
        }
        let Some(n) = self.count[cell].checked_add(1) else {
            return false;
        };
        self.count[cell] = n;
        self.mean[cell] += (value - self.mean[cell]) / n as f64;
        true
    }

    /// Fold one score per cell. Missing scores contribute nothing; out of
    /// range values are rejected without affecting other cells.
    pub fn fold_scores(&mut self, scores: &[u8]) -> Result<FoldReport> {
        if scores.len() != self.mean.len() {
            return Err(ClimatologyError::CellCount {
                expected: self.mean.len(),
                actual: scores.len(),
            });
        }
        let mut report = FoldReport::default();
        for (cell, &score) in scores.iter().enumerate() {
            if score == SCORE_MISSING {
                report.missing += 1;
            } else if self.add(cell, score as f64) {
                report.accepted += 1;
            } else {
                report.rejected += 1;
            }
        }
        Ok(report)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let cells = self.mean.len();
        let mut payload = Vec::with_capacity(8 + cells * 12);
        payload.extend_from_slice(&self.month.to_le_bytes());
        payload.extend_from_slice(&(cells as u32).to_le_bytes());
        put_f64_column(&mut payload, &self.mean);
        put_u32_column(&mut payload, &self.count);
        Ok(encode_frame(FrameKind::MonthlyAccumulator, &payload)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let payload = decode_frame(data, FrameKind::MonthlyAccumulator)?;
        let mut r = PayloadReader::new(&payload);
        let month = check_month(r.u32()?)?;
        let cells = r.u32()? as usize;
        let mean = r.f64_column(cells)?;
        let count = r.u32_column(cells)?;
        r.finish()?;
        Ok(Self { month, mean, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    #[test]
    fn test_running_mean() {
        let mut acc = MonthlyAccumulator::new(6, 1).unwrap();
        for score in [40.0, 60.0, 80.0] {
            assert!(acc.add(0, score));
        }
        assert_approx_eq!(acc.mean(0).unwrap(), 60.0, 1e-12);
        assert_eq!(acc.count(0), 3);

        assert!(acc.add(0, 20.0));
        assert_approx_eq!(acc.mean(0).unwrap(), 50.0, 1e-12);
        assert_eq!(acc.count(0), 4);
    }

    #[test]
    fn test_fold_skips_missing_and_rejects_invalid() {
        let mut acc = MonthlyAccumulator::new(1, 4).unwrap();
        let report = acc.fold_scores(&[50, SCORE_MISSING, 101, 0]).unwrap();
        assert_eq!(
            report,
            FoldReport {
                accepted: 2,
                missing: 1,
                rejected: 1
            }
        );
        assert_eq!(acc.mean(1), None);
        assert_eq!(acc.mean(2), None);
        assert_eq!(acc.mean(3), Some(0.0));
    }

    #[test]
    fn test_fold_length_mismatch() {
        let mut acc = MonthlyAccumulator::new(1, 4).unwrap();
        assert!(acc.fold_scores(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let mut acc = MonthlyAccumulator::new(12, 3).unwrap();
        acc.fold_scores(&[10, 20, SCORE_MISSING]).unwrap();
        acc.fold_scores(&[30, 25, SCORE_MISSING]).unwrap();
        let back = MonthlyAccumulator::decode(&acc.encode().unwrap()).unwrap();
        assert_eq!(back, acc);
        assert_eq!(back.mean(0), Some(20.0));
    }

    #[test]
    fn test_invalid_month() {
        assert!(MonthlyAccumulator::new(13, 1).is_err());
        assert!(MonthlyAccumulator::new(0, 1).is_err());
    }
}
