//! Resampling of source grids onto the canonical grid.
//!
//! Source and target are both regular latitude/longitude grids, so the
//! interpolation weights separate per axis. A [`Regridder`] precomputes one
//! plan per canonical row and one per canonical column and reuses them for
//! every field that shares the source grid.

use grib2_parser::GridDefinition;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sky_common::{CanonicalGrid, ScanMode};

use crate::error::{IngestionError, Result};

/// Offsets this close to a grid line are treated as exactly on it.
const SNAP_EPSILON: f64 = 1e-6;

/// Interpolation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegridMethod {
    Nearest,
    #[default]
    Bilinear,
}

/// Geometry of a regular source grid in scan order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceGrid {
    pub ni: usize,
    pub nj: usize,
    pub first_lat: f64,
    pub first_lng: f64,
    /// Signed latitude change per step along j.
    pub lat_step: f64,
    /// Signed longitude change per step along i.
    pub lng_step: f64,
    pub scan_mode: ScanMode,
    /// Whether the i axis covers the whole globe.
    pub wraps: bool,
}

impl SourceGrid {
    pub fn from_definition(grid: &GridDefinition) -> Result<Self> {
        if grid.template != 0 {
            return Err(IngestionError::UnsupportedGrid(format!(
                "grid template 3.{} is not a regular lat/lon grid",
                grid.template
            )));
        }
        let ni = grid.ni as usize;
        let nj = grid.nj as usize;
        if ni == 0 || nj == 0 {
            return Err(IngestionError::UnsupportedGrid(format!(
                "empty grid {}x{}",
                ni, nj
            )));
        }
        let di = grid.i_increment();
        let dj = grid.j_increment();
        if di <= 0.0 || (nj > 1 && dj <= 0.0) {
            return Err(IngestionError::UnsupportedGrid(format!(
                "non-positive increments ({}, {})",
                di, dj
            )));
        }

        let scan_mode = grid.scan_mode;
        let lat_step = if scan_mode.j_positive { dj } else { -dj };
        let lng_step = if scan_mode.i_negative { -di } else { di };
        let wraps = (ni as f64 * di - 360.0).abs() < di * 0.5;

        Ok(Self {
            ni,
            nj,
            first_lat: grid.first_latitude(),
            first_lng: grid.first_longitude(),
            lat_step,
            lng_step,
            scan_mode,
            wraps,
        })
    }

    pub fn len(&self) -> usize {
        self.ni * self.nj
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fractional j index of a latitude, `None` outside the grid.
    fn j_position(&self, lat: f64) -> Option<f64> {
        if self.nj == 1 {
            return ((lat - self.first_lat).abs() < SNAP_EPSILON).then_some(0.0);
        }
        let j = snap((lat - self.first_lat) / self.lat_step);
        (j >= 0.0 && j <= (self.nj - 1) as f64).then_some(j)
    }

    /// Fractional i index of a longitude, `None` outside the grid.
    fn i_position(&self, lng: f64) -> Option<f64> {
        let delta = if self.lng_step > 0.0 {
            lng - self.first_lng
        } else {
            self.first_lng - lng
        };
        let i = snap(delta.rem_euclid(360.0) / self.lng_step.abs());
        let limit = if self.wraps { self.ni } else { self.ni - 1 };
        if i <= limit as f64 {
            Some(i)
        } else if snap(i - 360.0 / self.lng_step.abs()).abs() < SNAP_EPSILON {
            // A full turn past the origin lands back on column 0.
            Some(0.0)
        } else {
            None
        }
    }
}

fn snap(x: f64) -> f64 {
    let r = x.round();
    if (x - r).abs() < SNAP_EPSILON {
        r
    } else {
        x
    }
}

/// Interpolation along one axis: lower index, upper index and the weight of
/// the upper index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisWeight {
    lo: usize,
    hi: usize,
    w: f64,
}

impl AxisWeight {
    fn at(pos: f64, len: usize, wraps: bool) -> Self {
        let lo = pos.floor() as usize;
        let w = pos - lo as f64;
        if w == 0.0 {
            let lo = if wraps { lo % len } else { lo };
            return Self { lo, hi: lo, w: 0.0 };
        }
        let hi = if wraps { (lo + 1) % len } else { (lo + 1).min(len - 1) };
        Self {
            lo: lo % len,
            hi,
            w,
        }
    }

    fn nearest(&self) -> usize {
        if self.w <= 0.5 {
            self.lo
        } else {
            self.hi
        }
    }

    /// (index, weight) pairs with non-zero weight.
    fn taps(&self) -> impl Iterator<Item = (usize, f64)> {
        let lo = (self.w < 1.0).then_some((self.lo, 1.0 - self.w));
        let hi = (self.w > 0.0).then_some((self.hi, self.w));
        lo.into_iter().chain(hi)
    }
}

/// Precomputed mapping from one source grid onto the canonical grid.
#[derive(Debug, Clone)]
pub struct Regridder {
    source: SourceGrid,
    method: RegridMethod,
    rows: Vec<Option<AxisWeight>>,
    cols: Vec<Option<AxisWeight>>,
}

impl Regridder {
    pub fn new(grid: &GridDefinition, target: &CanonicalGrid, method: RegridMethod) -> Result<Self> {
        let source = SourceGrid::from_definition(grid)?;
        Ok(Self::from_source(source, target, method))
    }

    pub fn from_source(source: SourceGrid, target: &CanonicalGrid, method: RegridMethod) -> Self {
        let rows = target
            .lats()
            .iter()
            .map(|&lat| {
                source
                    .j_position(lat)
                    .map(|j| AxisWeight::at(j, source.nj, false))
            })
            .collect();
        let cols = target
            .lngs()
            .iter()
            .map(|&lng| {
                source
                    .i_position(lng)
                    .map(|i| AxisWeight::at(i, source.ni, source.wraps))
            })
            .collect();
        Self {
            source,
            method,
            rows,
            cols,
        }
    }

    pub fn source(&self) -> &SourceGrid {
        &self.source
    }

    pub fn method(&self) -> RegridMethod {
        self.method
    }

    /// Number of canonical cells that fall inside the source grid.
    pub fn covered_cells(&self) -> usize {
        let rows = self.rows.iter().filter(|r| r.is_some()).count();
        let cols = self.cols.iter().filter(|c| c.is_some()).count();
        rows * cols
    }

    /// Resample source values (in scan order) onto the canonical grid,
    /// row-major from north-west.
    pub fn apply(&self, values: &[f32]) -> Result<Vec<f32>> {
        if values.len() != self.source.len() {
            return Err(IngestionError::Common(
                sky_common::CommonError::DimensionMismatch {
                    expected: self.source.len(),
                    actual: values.len(),
                },
            ));
        }

        let width = self.cols.len();
        let mut out = vec![f32::NAN; width * self.rows.len()];
        if width == 0 {
            return Ok(out);
        }

        out.par_chunks_mut(width)
            .zip(self.rows.par_iter())
            .for_each(|(row_out, row)| {
                let Some(row) = row else {
                    return;
                };
                for (cell, col) in row_out.iter_mut().zip(&self.cols) {
                    if let Some(col) = col {
                        *cell = match self.method {
                            RegridMethod::Nearest => self.sample(values, col.nearest(), row.nearest()),
                            RegridMethod::Bilinear => self.bilinear(values, col, row),
                        };
                    }
                }
            });

        Ok(out)
    }

    fn sample(&self, values: &[f32], i: usize, j: usize) -> f32 {
        let idx = self
            .source
            .scan_mode
            .flat_index(i, j, self.source.ni, self.source.nj);
        values.get(idx).copied().unwrap_or(f32::NAN)
    }

    /// Weighted mean of the corners with non-zero weight. Any NaN corner
    /// yields NaN; the result never leaves the corners' range.
    fn bilinear(&self, values: &[f32], col: &AxisWeight, row: &AxisWeight) -> f32 {
        let mut sum = 0.0f64;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (j, wj) in row.taps() {
            for (i, wi) in col.taps() {
                let v = self.sample(values, i, j);
                if v.is_nan() {
                    return f32::NAN;
                }
                let v = v as f64;
                sum += v * wi * wj;
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        sum.clamp(lo, hi) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(first_lat: f64, first_lng: f64, step: f64, ni: u32, nj: u32, flag: u8) -> GridDefinition {
        let micro = |v: f64| (v * 1e6).round() as i32;
        let scan_mode = ScanMode::from_grib2_flag(flag);
        let lat_sign = if scan_mode.j_positive { 1.0 } else { -1.0 };
        let lng_sign = if scan_mode.i_negative { -1.0 } else { 1.0 };
        GridDefinition {
            template: 0,
            num_points: ni * nj,
            ni,
            nj,
            first_latitude_micro: micro(first_lat),
            first_longitude_micro: micro(first_lng),
            last_latitude_micro: micro(first_lat + lat_sign * step * (nj - 1) as f64),
            last_longitude_micro: micro(first_lng + lng_sign * step * (ni - 1) as f64),
            i_increment_micro: (step * 1e6).round() as u32,
            j_increment_micro: (step * 1e6).round() as u32,
            scan_mode,
        }
    }

    #[test]
    fn test_identity_regrid_is_exact() {
        let def = definition(10.0, 0.0, 10.0, 3, 2, 0);
        let target = CanonicalGrid::regular(10.0, 0.0, 10.0, 2, 3);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(regridder.apply(&values).unwrap(), values);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let def = definition(10.0, 0.0, 10.0, 2, 2, 0);
        let target = CanonicalGrid::regular(5.0, 5.0, 10.0, 1, 1);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        let out = regridder.apply(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        assert!((out[0] - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_ties_go_to_lower_index() {
        let def = definition(10.0, 0.0, 10.0, 2, 2, 0);
        let target = CanonicalGrid::regular(5.0, 5.0, 10.0, 1, 1);
        let regridder = Regridder::new(&def, &target, RegridMethod::Nearest).unwrap();
        let out = regridder.apply(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_nan_corner_poisons_bilinear_only_when_used() {
        let def = definition(10.0, 0.0, 10.0, 2, 2, 0);
        let target = CanonicalGrid::regular(10.0, 0.0, 5.0, 3, 3);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        let out = regridder.apply(&[1.0, 2.0, 3.0, f32::NAN]).unwrap();
        // Top-left corner and the top edge midpoint never touch the NaN.
        assert_eq!(out[0], 1.0);
        assert!((out[1] - 1.5).abs() < 1e-6);
        assert!(out[4].is_nan());
        assert!(out[8].is_nan());
    }

    #[test]
    fn test_outside_coverage_is_nan() {
        let def = definition(10.0, 100.0, 1.0, 5, 5, 0);
        let target = CanonicalGrid::regular(20.0, 90.0, 2.0, 10, 20);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        assert!(!regridder.source().wraps);
        let out = regridder.apply(&vec![7.0; 25]).unwrap();
        let finite = out.iter().filter(|v| v.is_finite()).count();
        assert_eq!(finite, regridder.covered_cells());
        assert!(finite > 0);
        assert!(out.iter().filter(|v| v.is_finite()).all(|&v| v == 7.0));
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_global_grid_wraps_longitude() {
        // 90° columns: 0, 90, 180, 270. Target at 315 sits between 270 and 0.
        let def = definition(0.0, 0.0, 90.0, 4, 1, 0);
        let target = CanonicalGrid::regular(0.0, 315.0, 1.0, 1, 1);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        assert!(regridder.source().wraps);
        let out = regridder.apply(&[0.0, 10.0, 20.0, 40.0]).unwrap();
        assert!((out[0] - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_south_to_north_scan() {
        // Rows stored south first: scan flag 0x40.
        let def = definition(0.0, 0.0, 10.0, 1, 2, 0x40);
        let target = CanonicalGrid::regular(10.0, 0.0, 10.0, 2, 1);
        let regridder = Regridder::new(&def, &target, RegridMethod::Nearest).unwrap();
        let out = regridder.apply(&[1.0, 2.0]).unwrap();
        assert_eq!(out, vec![2.0, 1.0]);
    }

    #[test]
    fn test_bilinear_stays_within_corner_bounds() {
        let def = definition(10.0, 0.0, 10.0, 2, 2, 0);
        let target = CanonicalGrid::regular(10.0, 0.0, 0.7, 15, 15);
        let regridder = Regridder::new(&def, &target, RegridMethod::Bilinear).unwrap();
        let out = regridder.apply(&[0.0, 100.0, 100.0, 0.0]).unwrap();
        for v in out.into_iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(&v), "{v} out of bounds");
        }
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let def = definition(10.0, 0.0, 10.0, 2, 2, 0);
        let target = CanonicalGrid::regular(10.0, 0.0, 10.0, 2, 2);
        let regridder = Regridder::new(&def, &target, RegridMethod::Nearest).unwrap();
        assert!(regridder.apply(&[1.0, 2.0, 3.0]).is_err());
    }
}
