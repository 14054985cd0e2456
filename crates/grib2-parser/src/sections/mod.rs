//! GRIB2 section parsing.
//!
//! Each GRIB2 message consists of numbered sections: 0 (indicator),
//! 1 (identification), an optional 2 (local use), 3 (grid definition),
//! 4 (product definition), 5 (data representation), 6 (bitmap), 7 (data)
//! and the `7777` end marker. Section offsets below are zero-based within
//! the section, so octet N of the WMO tables is index N-1.
//!
//! Signed integers in GRIB2 use sign-and-magnitude encoding, not two's
//! complement.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use sky_common::ScanMode;

use crate::error::{Grib2Error, Result};
use crate::tables;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Section 3: Grid Definition Section, template 3.0 (regular lat/lon).
///
/// Angles are kept in the encoded microdegrees; the accessors convert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridDefinition {
    pub template: u16,
    pub num_points: u32,
    /// Points along a parallel.
    pub ni: u32,
    /// Points along a meridian.
    pub nj: u32,
    pub first_latitude_micro: i32,
    pub first_longitude_micro: i32,
    pub last_latitude_micro: i32,
    pub last_longitude_micro: i32,
    pub i_increment_micro: u32,
    pub j_increment_micro: u32,
    pub scan_mode: ScanMode,
}

impl GridDefinition {
    pub fn first_latitude(&self) -> f64 {
        self.first_latitude_micro as f64 * 1e-6
    }

    pub fn first_longitude(&self) -> f64 {
        self.first_longitude_micro as f64 * 1e-6
    }

    pub fn last_latitude(&self) -> f64 {
        self.last_latitude_micro as f64 * 1e-6
    }

    pub fn last_longitude(&self) -> f64 {
        self.last_longitude_micro as f64 * 1e-6
    }

    pub fn i_increment(&self) -> f64 {
        self.i_increment_micro as f64 * 1e-6
    }

    pub fn j_increment(&self) -> f64 {
        self.j_increment_micro as f64 * 1e-6
    }
}

/// Wavelength band of an aerosol optical product, in nanometres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthInterval {
    pub interval_type: u8,
    pub first_nm: f64,
    pub second_nm: f64,
}

impl WavelengthInterval {
    /// Whether the band contains the given wavelength.
    pub fn contains_nm(&self, nm: f64) -> bool {
        let lo = self.first_nm.min(self.second_nm);
        let hi = self.first_nm.max(self.second_nm);
        nm >= lo - 1e-6 && nm <= hi + 1e-6
    }

    /// Whether the band lies within `[lo, hi]` nanometres.
    pub fn within_nm(&self, lo: f64, hi: f64) -> bool {
        self.first_nm >= lo - 1e-6 && self.second_nm <= hi + 1e-6
    }
}

/// Aerosol metadata carried by product template 4.48.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AerosolInfo {
    /// Code table 4.233 (62000 = total aerosol).
    pub aerosol_type: u16,
    pub wavelength: WavelengthInterval,
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub parameter_short_name: String,
    pub level_type: u8,
    pub level_value: f64,
    pub level_description: String,
    /// Lead time converted to hours.
    pub forecast_hour: u32,
    /// Ensemble perturbation number (templates 4.1 and 4.49).
    pub perturbation_number: Option<u8>,
    /// Number of forecasts in the ensemble (templates 4.1 and 4.49).
    pub ensemble_size: Option<u8>,
    /// Aerosol type and optical wavelength (templates 4.48 and 4.49).
    pub aerosol: Option<AerosolInfo>,
    /// Statistical process of a time-averaged or accumulated field
    /// (template 4.8, code table 4.10).
    pub statistical_process: Option<u8>,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    /// Number of packed values (grid points minus bitmap-masked ones).
    pub num_data_points: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    pub original_data_type: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// 0 = bitmap follows, 255 = no bitmap, others are predefined/reused.
    pub indicator: u8,
    pub data: Bytes,
}

impl Bitmap {
    pub fn is_present(&self) -> bool {
        self.indicator == 0
    }
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

// ===== Integer helpers =====

fn be_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn be_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Sign-and-magnitude 16-bit integer.
pub(crate) fn sm_i16(b: &[u8], at: usize) -> i16 {
    let raw = be_u16(b, at);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Sign-and-magnitude 32-bit integer.
pub(crate) fn sm_i32(b: &[u8], at: usize) -> i32 {
    let raw = be_u32(b, at);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Sign-and-magnitude 8-bit integer.
fn sm_i8(byte: u8) -> i8 {
    let magnitude = (byte & 0x7F) as i8;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Apply a GRIB2 scale factor: `value / 10^factor`. All-ones means missing.
fn scaled(factor: u8, value: u32) -> f64 {
    if factor == 0xFF || value == 0xFFFF_FFFF {
        return f64::NAN;
    }
    value as f64 / 10f64.powi(sm_i8(factor) as i32)
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from the start of a message.
pub fn parse_indicator(data: &[u8]) -> Result<Indicator> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }
    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&data[8..16]);

    Ok(Indicator {
        discipline,
        edition,
        message_length: u64::from_be_bytes(len),
    })
}

/// Parse Section 1 (Identification), located right after section 0.
pub fn parse_identification(data: &[u8]) -> Result<Identification> {
    let offset = find_section(data, 1)?;
    let s = &data[offset..];
    if s.len() < 21 {
        return Err(Grib2Error::section(1, "Not enough data"));
    }

    let year = be_u16(s, 12);
    let (month, day, hour, minute, second) = (s[14], s[15], s[16], s[17], s[18]);
    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| {
            Grib2Error::section(
                1,
                format!(
                    "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ),
            )
        })?;

    Ok(Identification {
        center: be_u16(s, 5),
        sub_center: be_u16(s, 7),
        table_version: s[9],
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        production_status: s[19],
        data_type: s[20],
    })
}

/// Parse Section 3 (Grid Definition). Only template 3.0 is supported.
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition> {
    let offset = find_section(data, 3)?;
    let s = &data[offset..];
    if s.len() < 14 {
        return Err(Grib2Error::section(3, "Not enough data"));
    }

    let num_points = be_u32(s, 6);
    let template = be_u16(s, 12);
    if template != 0 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 3,
            template,
        });
    }

    // Template 3.0 body starts at index 14 and is 58 octets long.
    let gd = &s[14..];
    if gd.len() < 58 {
        return Err(Grib2Error::section(
            3,
            format!("Template 0 needs at least 58 bytes, got {}", gd.len()),
        ));
    }

    let basic_angle = be_u32(gd, 24);
    let subdivisions = be_u32(gd, 28);
    if basic_angle != 0 && subdivisions != 0xFFFF_FFFF && subdivisions != 0 {
        return Err(Grib2Error::section(
            3,
            format!(
                "Non-default angle units ({}/{}) are not supported",
                basic_angle, subdivisions
            ),
        ));
    }

    Ok(GridDefinition {
        template,
        num_points,
        ni: be_u32(gd, 16),
        nj: be_u32(gd, 20),
        first_latitude_micro: sm_i32(gd, 32),
        first_longitude_micro: sm_i32(gd, 36),
        last_latitude_micro: sm_i32(gd, 41),
        last_longitude_micro: sm_i32(gd, 45),
        i_increment_micro: be_u32(gd, 49),
        j_increment_micro: be_u32(gd, 53),
        scan_mode: ScanMode::from_grib2_flag(gd[57]),
    })
}

/// Convert a forecast time in the given unit (code table 4.4) to hours.
fn forecast_hours(unit: u8, value: u32) -> Result<u32> {
    match unit {
        0 => Ok(value / 60),
        1 => Ok(value),
        2 => Ok(value * 24),
        10 => Ok(value * 3),
        11 => Ok(value * 6),
        12 => Ok(value * 12),
        other => Err(Grib2Error::section(
            4,
            format!("Unsupported time range unit {}", other),
        )),
    }
}

/// Parse Section 4 (Product Definition).
///
/// Supports templates 4.0 (analysis/forecast), 4.1 (individual ensemble
/// member), 4.8 (statistically processed over a time interval), 4.48
/// (aerosol optical properties) and 4.49 (aerosol optical properties of an
/// ensemble member).
///
/// For template 4.8 the forecast hour is the end of the processing
/// interval, the hour the field is valid at.
pub fn parse_product_definition(data: &[u8], discipline: u8) -> Result<ProductDefinition> {
    let offset = find_section(data, 4)?;
    let s = &data[offset..];
    if s.len() < 11 {
        return Err(Grib2Error::section(4, "Not enough data"));
    }

    let template = be_u16(s, 7);
    let parameter_category = s[9];
    let parameter_number = s[10];

    // Index of the "indicator of unit of time range" octet; the forecast
    // time and fixed surfaces follow at the same relative offsets in all
    // supported templates.
    let (time_unit_at, min_len) = match template {
        0 => (17, 34),
        1 => (17, 37),
        8 => (17, 58),
        48 => (41, 58),
        49 => (41, 61),
        other => {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 4,
                template: other,
            })
        }
    };
    if s.len() < min_len {
        return Err(Grib2Error::section(
            4,
            format!("Template 4.{} needs {} bytes, got {}", template, min_len, s.len()),
        ));
    }

    let mut forecast_hour = forecast_hours(s[time_unit_at], be_u32(s, time_unit_at + 1))?;
    let level_type = s[time_unit_at + 5];
    let level_value = scaled(s[time_unit_at + 6], be_u32(s, time_unit_at + 7));

    let mut statistical_process = None;
    if template == 8 {
        if s[41] == 0 {
            return Err(Grib2Error::section(4, "Template 4.8 without a time range"));
        }
        // First time range specification.
        statistical_process = Some(s[46]);
        forecast_hour += forecast_hours(s[48], be_u32(s, 49))?;
    }

    let (perturbation_number, ensemble_size) = match template {
        1 => (Some(s[35]), Some(s[36])),
        49 => (Some(s[59]), Some(s[60])),
        _ => (None, None),
    };
    let aerosol = matches!(template, 48 | 49).then(|| AerosolInfo {
        aerosol_type: be_u16(s, 11),
        wavelength: WavelengthInterval {
            interval_type: s[24],
            first_nm: scaled(s[25], be_u32(s, 26)) * 1e9,
            second_nm: scaled(s[30], be_u32(s, 31)) * 1e9,
        },
    });

    Ok(ProductDefinition {
        template,
        parameter_category,
        parameter_number,
        parameter_short_name: tables::parameter_short_name(
            discipline,
            parameter_category,
            parameter_number,
        ),
        level_type,
        level_value,
        level_description: tables::level_description(level_type, level_value),
        forecast_hour,
        perturbation_number,
        ensemble_size,
        aerosol,
        statistical_process,
    })
}

/// Parse Section 5 (Data Representation).
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation> {
    let offset = find_section(data, 5)?;
    let s = &data[offset..];
    if s.len() < 11 {
        return Err(Grib2Error::section(5, "Not enough data"));
    }

    let num_data_points = be_u32(s, 5);
    let template = be_u16(s, 9);

    // Templates 5.0, 5.2, 5.3, 5.40 and 5.41 share the simple packing
    // header: R (IEEE float), E, D, bits per value, original type.
    let (reference_value, binary_scale_factor, decimal_scale_factor, bits, original) =
        if s.len() >= 21 {
            (
                f32::from_be_bytes([s[11], s[12], s[13], s[14]]),
                sm_i16(s, 15),
                sm_i16(s, 17),
                s[19],
                s[20],
            )
        } else {
            (0.0, 0, 0, 0, 0)
        };

    Ok(DataRepresentation {
        num_data_points,
        template,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value: bits,
        original_data_type: original,
    })
}

/// Parse Section 6 (Bitmap). Returns `None` when the section is absent.
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>> {
    let offset = match find_section(data, 6) {
        Ok(offset) => offset,
        Err(_) => return Ok(None),
    };
    let s = &data[offset..];
    if s.len() < 6 {
        return Err(Grib2Error::section(6, "Not enough data"));
    }

    let length = be_u32(s, 0) as usize;
    let indicator = s[5];
    if indicator != 0 && indicator != 255 {
        return Err(Grib2Error::section(
            6,
            format!("Predefined bitmap {} is not supported", indicator),
        ));
    }
    let bitmap_data = if indicator == 0 && length > 6 {
        Bytes::copy_from_slice(&s[6..length])
    } else {
        Bytes::new()
    };

    Ok(Some(Bitmap {
        indicator,
        data: bitmap_data,
    }))
}

/// Parse Section 7 (Data).
pub fn parse_data_section(data: &[u8]) -> Result<DataSection> {
    let offset = find_section(data, 7)?;
    let s = &data[offset..];
    let length = be_u32(s, 0) as usize;

    let data_bytes = if length > 5 {
        Bytes::copy_from_slice(&s[5..length])
    } else {
        Bytes::new()
    };
    Ok(DataSection { data: data_bytes })
}

// ===== Helper Functions =====

/// Find a section by number within a message, returning its byte offset.
pub(crate) fn find_section(data: &[u8], section_num: u8) -> Result<usize> {
    let mut offset = 16; // After Section 0

    loop {
        if offset + 4 <= data.len() && &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::section(
                section_num,
                "Reached end of message without finding section",
            ));
        }
        if offset + 5 > data.len() {
            return Err(Grib2Error::section(section_num, "Section not found"));
        }

        let section_length = be_u32(data, offset) as usize;
        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::section(section_num, "Invalid section length"));
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }
        offset += section_length;
    }
}
