//! Test data generators for creating synthetic forecast fields.
//!
//! These generators create predictable, verifiable patterns that can be used
//! across the test suite. All grids are row-major (row 0 first).

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a cloud cover grid in percent.
///
/// Values rise linearly from 0% in the first column to 100% in the last,
/// so every cloud bin is represented on grids at least 6 columns wide.
pub fn create_cloud_cover_grid(width: usize, height: usize) -> Vec<f32> {
    let denom = width.saturating_sub(1).max(1) as f32;
    let mut data = Vec::with_capacity(width * height);
    for _row in 0..height {
        for col in 0..width {
            data.push(100.0 * col as f32 / denom);
        }
    }
    data
}

/// Creates a relative humidity grid in percent.
///
/// Humid (90%) near the equator row, drying linearly to 10% at the poles.
pub fn create_humidity_grid(width: usize, height: usize) -> Vec<f32> {
    let mid = height.saturating_sub(1) as f32 / 2.0;
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let distance = if mid > 0.0 {
            (row as f32 - mid).abs() / mid
        } else {
            0.0
        };
        let rh = 90.0 - 80.0 * distance;
        data.extend(std::iter::repeat(rh).take(width));
    }
    data
}

/// Creates an aerosol optical depth grid.
///
/// A smooth pattern between 0.02 and 0.6, with a deterministic pseudo-random
/// component derived from `seed`.
pub fn create_aod_grid(width: usize, height: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let mut data = Vec::with_capacity(width * height);
    for _ in 0..width * height {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let unit = (state % 10_000) as f32 / 10_000.0;
        data.push(0.02 + 0.58 * unit);
    }
    data
}

/// Creates a grid filled with a constant value.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Creates a grid with NaN values at specified positions.
///
/// Useful for testing missing data handling.
///
/// # Arguments
///
/// * `width` - Number of columns
/// * `height` - Number of rows
/// * `fill` - Value for every other cell
/// * `nan_positions` - List of (col, row) positions that should be NaN
pub fn create_grid_with_nans(
    width: usize,
    height: usize,
    fill: f32,
    nan_positions: &[(usize, usize)],
) -> Vec<f32> {
    let mut data = vec![fill; width * height];
    for &(col, row) in nan_positions {
        if col < width && row < height {
            data[row * width + col] = f32::NAN;
        }
    }
    data
}
