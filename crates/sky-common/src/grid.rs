//! Canonical latitude/longitude grid.
//!
//! The canonical grid is built once at process start and shared behind an
//! `Arc`. Every array in the pipeline is row-major over it:
//! `values[lat_idx * width + lng_idx]`.

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Resolution of the production grid in degrees.
pub const QUARTER_DEGREE: f64 = 0.25;

/// Immutable regular latitude/longitude grid.
///
/// Latitudes run north to south starting at `lats[0]`; longitudes run east
/// starting at `lngs[0]`, in the 0..360 convention of the forecast sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalGrid {
    lats: Vec<f64>,
    lngs: Vec<f64>,
    resolution: f64,
}

impl CanonicalGrid {
    /// The global 0.25° grid: 721 latitudes (90 → -90) by 1440 longitudes
    /// (0 → 359.75).
    pub fn quarter_degree() -> Self {
        Self::regular(90.0, 0.0, QUARTER_DEGREE, 721, 1440)
    }

    /// Build a regular grid with `height` rows descending from `first_lat`
    /// and `width` columns ascending from `first_lng`.
    pub fn regular(
        first_lat: f64,
        first_lng: f64,
        resolution: f64,
        height: usize,
        width: usize,
    ) -> Self {
        let lats = (0..height)
            .map(|i| first_lat - i as f64 * resolution)
            .collect();
        let lngs = (0..width)
            .map(|j| first_lng + j as f64 * resolution)
            .collect();
        Self {
            lats,
            lngs,
            resolution,
        }
    }

    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    pub fn lngs(&self) -> &[f64] {
        &self.lngs
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of latitude rows.
    pub fn height(&self) -> usize {
        self.lats.len()
    }

    /// Number of longitude columns.
    pub fn width(&self) -> usize {
        self.lngs.len()
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.lats.len() * self.lngs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty() || self.lngs.is_empty()
    }

    /// Whether the longitudes span the whole globe, so index arithmetic wraps.
    pub fn wraps_longitude(&self) -> bool {
        (self.width() as f64 * self.resolution - 360.0).abs() < 1e-6
    }

    /// Index of the latitude row nearest to `lat`.
    ///
    /// Equidistant latitudes resolve to the lower (more northern) index, so
    /// 89.875 maps to row 0 on the quarter-degree grid.
    pub fn lat_idx(&self, lat: f64) -> CommonResult<usize> {
        if !(-90.0..=90.0).contains(&lat) || self.lats.is_empty() {
            return Err(CommonError::CoordinateOutOfRange {
                axis: "latitude",
                value: lat,
            });
        }
        let offset = (self.lats[0] - lat) / self.resolution;
        nearest_index(offset, self.height()).ok_or(CommonError::CoordinateOutOfRange {
            axis: "latitude",
            value: lat,
        })
    }

    /// Index of the longitude column nearest to `lng`.
    ///
    /// Accepts both the -180..180 and the 0..360 conventions.
    pub fn lng_idx(&self, lng: f64) -> CommonResult<usize> {
        if !(-180.0..=360.0).contains(&lng) || self.lngs.is_empty() {
            return Err(CommonError::CoordinateOutOfRange {
                axis: "longitude",
                value: lng,
            });
        }
        let normalized = (lng - self.lngs[0]).rem_euclid(360.0);
        let offset = normalized / self.resolution;
        if self.wraps_longitude() {
            let idx = nearest_index(offset, self.width() + 1).unwrap_or(0);
            return Ok(idx % self.width());
        }
        nearest_index(offset, self.width()).ok_or(CommonError::CoordinateOutOfRange {
            axis: "longitude",
            value: lng,
        })
    }

    /// Flat array index of a cell.
    pub fn cell(&self, lat_idx: usize, lng_idx: usize) -> usize {
        lat_idx * self.width() + lng_idx
    }

    /// Flat array index of the cell nearest to a coordinate.
    pub fn cell_at(&self, lat: f64, lng: f64) -> CommonResult<usize> {
        Ok(self.cell(self.lat_idx(lat)?, self.lng_idx(lng)?))
    }

    /// Coordinates of a flat cell index as (lat, lng), lng in -180..180.
    pub fn coords(&self, cell: usize) -> (f64, f64) {
        let lat = self.lats[cell / self.width()];
        let lng = self.lngs[cell % self.width()];
        (lat, signed_longitude(lng))
    }
}

/// Convert a longitude to the -180..180 convention.
pub fn signed_longitude(lng: f64) -> f64 {
    let wrapped = lng.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Nearest integer index for a fractional offset, ties rounding down.
fn nearest_index(offset: f64, len: usize) -> Option<usize> {
    let idx = (offset - 0.5).ceil();
    if idx < 0.0 || idx >= len as f64 {
        return None;
    }
    Some(idx as usize)
}

/// Scan mode flags for source grid data ordering.
///
/// Based on GRIB2 scanning mode (Flag Table 3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanMode {
    /// +i direction: false = +x (east), true = -x (west)
    pub i_negative: bool,
    /// +j direction: false = -y (south), true = +y (north)
    pub j_positive: bool,
    /// Adjacent points: false = i direction, true = j direction
    pub j_consecutive: bool,
    /// Row scan direction alternates
    pub alternating_rows: bool,
}

impl ScanMode {
    /// Data starts at the north-west corner, rows go west to east and
    /// successive rows go north to south.
    pub fn standard() -> Self {
        Self {
            i_negative: false,
            j_positive: false,
            j_consecutive: false,
            alternating_rows: false,
        }
    }

    /// Create from GRIB2 flag byte.
    pub fn from_grib2_flag(flag: u8) -> Self {
        Self {
            i_negative: (flag & 0x80) != 0,
            j_positive: (flag & 0x40) != 0,
            j_consecutive: (flag & 0x20) != 0,
            alternating_rows: (flag & 0x10) != 0,
        }
    }

    /// Flat index of the value stored for column `i`, row `j`, where `i` and
    /// `j` count along the scan directions.
    pub fn flat_index(&self, i: usize, j: usize, ni: usize, nj: usize) -> usize {
        let i = if self.alternating_rows && j % 2 == 1 {
            ni - 1 - i
        } else {
            i
        };
        if self.j_consecutive {
            i * nj + j
        } else {
            j * ni + i
        }
    }
}

impl Default for ScanMode {
    fn default() -> Self {
        Self::standard()
    }
}
