//! GRIB2 parameter and level lookup tables.
//!
//! Only the codes that show up in the deterministic and aerosol products the
//! pipeline reads are named; everything else is formatted from its codes.

/// Short name for a (discipline, category, number) triple.
pub fn parameter_short_name(discipline: u8, category: u8, number: u8) -> String {
    let name = match (discipline, category, number) {
        // Temperature
        (0, 0, 0) => "TMP",
        (0, 0, 6) => "DPT",
        // Moisture
        (0, 1, 0) => "SPFH",
        (0, 1, 1) => "RH",
        (0, 1, 3) => "PWAT",
        // Cloud
        (0, 6, 1) => "TCDC",
        (0, 6, 3) => "LCDC",
        (0, 6, 4) => "MCDC",
        (0, 6, 5) => "HCDC",
        // Physical atmospheric properties
        (0, 19, 0) => "VIS",
        // Atmospheric chemical constituents
        (0, 20, 0) => "MASSDEN",
        (0, 20, 102) => "AOTK",
        (0, 20, 105) => "SSALBK",
        _ => return format!("P{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

/// Description of a fixed surface (code table 4.5).
pub fn level_description(level_type: u8, level_value: f64) -> String {
    match level_type {
        1 => "surface".to_string(),
        2 => "cloud base".to_string(),
        3 => "cloud top".to_string(),
        8 => "top of atmosphere".to_string(),
        10 => "entire atmosphere".to_string(),
        100 => format!("{} mb", level_value / 100.0),
        101 => "mean sea level".to_string(),
        103 => format!("{} m above ground", level_value),
        200 => "entire atmosphere (considered as a single layer)".to_string(),
        211 => "boundary layer cloud layer".to_string(),
        212 => "low cloud layer".to_string(),
        222 => "middle cloud layer".to_string(),
        232 => "high cloud layer".to_string(),
        _ => format!("Level type {} value {}", level_type, level_value),
    }
}
