//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! A pure Rust reader for the subset of GRIB2 the pipeline consumes:
//! regular lat/lon grids (template 3.0), analysis/forecast, ensemble and
//! time-averaged and aerosol optical products (templates 4.0, 4.1, 4.8,
//! 4.48, 4.49) and simple packing
//! (template 5.0). Other packings are decoded through the `grib` crate.

pub mod error;
pub mod message;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use error::{Grib2Error, Result};
pub use message::{Grib2Message, Grib2Reader};
pub use sections::{AerosolInfo, GridDefinition, ProductDefinition, WavelengthInterval};
pub use unpacking::{unpack_simple, SimplePacking};
