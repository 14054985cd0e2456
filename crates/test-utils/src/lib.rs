//! Shared test utilities for the skycast workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A synthetic GRIB2 message builder
//! - Field data generators
//! - Common fixtures (small grids, cycles, cache directories)
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod grib2;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use grib2::{grib2_file, Grib2Builder, ProductTemplate};

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that every value of two float slices is bit-identical, which
/// treats equal NaNs as equal.
#[macro_export]
macro_rules! assert_bits_eq {
    ($left:expr, $right:expr) => {{
        let left: &[f32] = &$left;
        let right: &[f32] = &$right;
        assert_eq!(left.len(), right.len(), "length mismatch");
        for (i, (a, b)) in left.iter().zip(right.iter()).enumerate() {
            if a.to_bits() != b.to_bits() {
                panic!("value {} differs: {:?} vs {:?}", i, a, b);
            }
        }
    }};
}
