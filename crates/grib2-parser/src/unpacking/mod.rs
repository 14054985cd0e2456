//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is decoded here. Other packings (complex,
//! JPEG2000, PNG) go through the `grib` crate, see [`crate::message`].

use crate::error::{Grib2Error, Result};

/// Parameters of a simple-packed field.
#[derive(Debug, Clone, Copy)]
pub struct SimplePacking {
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

impl SimplePacking {
    /// `Y = (R + X * 2^E) / 10^D`
    fn decode(&self, packed: u32) -> f32 {
        let r = self.reference_value as f64;
        let e = 2f64.powi(self.binary_scale_factor as i32);
        let d = 10f64.powi(self.decimal_scale_factor as i32);
        ((r + packed as f64 * e) / d) as f32
    }
}

/// Unpack simple packed data onto `num_points` grid points.
///
/// Only points whose bitmap bit is set have a packed value in the data
/// section; masked points come out as `f32::NAN`.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    packing: SimplePacking,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f32>> {
    let present = |i: usize| match bitmap {
        Some(bm) => bm
            .get(i / 8)
            .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
            .unwrap_or(false),
        None => true,
    };

    let bits = packing.bits_per_value as usize;
    if bits > 32 {
        return Err(Grib2Error::UnpackingError(format!(
            "Invalid number of bits per value: {}",
            bits
        )));
    }

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0usize;
    for i in 0..num_points {
        if !present(i) {
            values.push(f32::NAN);
            continue;
        }
        if bits == 0 {
            // Constant field: every value is the reference value.
            values.push(packing.decode(0));
            continue;
        }
        let packed = extract_bits(packed_data, bit_position, bits).ok_or_else(|| {
            Grib2Error::UnpackingError(format!(
                "Data section too short for point {} of {}",
                i, num_points
            ))
        })?;
        bit_position += bits;
        values.push(packing.decode(packed));
    }

    Ok(values)
}

/// Read `num_bits` bits MSB-first starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Option<u32> {
    let end_bit = start_bit + num_bits;
    if end_bit.div_ceil(8) > data.len() {
        return None;
    }

    let mut result = 0u32;
    for absolute_bit in start_bit..end_bit {
        let bit = (data[absolute_bit / 8] >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | bit as u32;
    }
    Some(result)
}
