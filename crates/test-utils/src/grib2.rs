//! Synthetic GRIB2 message builder.
//!
//! Creates small but structurally valid GRIB2 messages for the products the
//! pipeline reads: total cloud cover, relative humidity (template 4.0),
//! ensemble members (template 4.1), time averages (template 4.8) and aerosol
//! optical depth (templates 4.48 and 4.49).
//! Values are simple-packed with 16 bits; NaN values are written through a
//! bitmap.

use chrono::{Datelike, Timelike};

/// Which product definition template to emit in section 4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProductTemplate {
    /// Template 4.0: analysis or forecast at a horizontal level.
    Forecast,
    /// Template 4.1: individual ensemble forecast.
    EnsembleMember { perturbation: u8, members: u8 },
    /// Template 4.8: average over the `window_hours` ending at the forecast
    /// hour.
    Averaged { window_hours: u32 },
    /// Template 4.48: aerosol optical properties.
    Aerosol {
        aerosol_type: u16,
        wavelength_nm: (u32, u32),
    },
    /// Template 4.49: aerosol optical properties of one ensemble member.
    AerosolMember {
        aerosol_type: u16,
        wavelength_nm: (u32, u32),
        perturbation: u8,
        members: u8,
    },
    /// A template number the reader does not handle, with a 4.0 body.
    Unsupported(u16),
}

/// Build a GRIB2 message with the specified parameters.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    // Grid definition
    ni: u32,
    nj: u32,
    la1: i32, // microdegrees
    lo1: i32,
    di: u32,
    dj: u32,
    scanning_mode: u8,
    // Product definition
    template: ProductTemplate,
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    // Data (NaN = missing)
    data_values: Vec<f32>,
}

/// Sign-and-magnitude encoding of a 32-bit integer.
fn sm32(value: i32) -> [u8; 4] {
    if value < 0 {
        (0x8000_0000u32 | value.unsigned_abs()).to_be_bytes()
    } else {
        (value as u32).to_be_bytes()
    }
}

/// Sign-and-magnitude encoding of a 16-bit integer.
fn sm16(value: i16) -> [u8; 2] {
    if value < 0 {
        (0x8000u16 | value.unsigned_abs()).to_be_bytes()
    } else {
        (value as u16).to_be_bytes()
    }
}

impl Grib2Builder {
    /// Total cloud cover on the entire-atmosphere level, on a 4° global
    /// grid of 46 rows by 90 columns starting at 90N/0E.
    pub fn cloud_cover() -> Self {
        Self {
            discipline: 0,
            center: 7, // NCEP
            year: 2024,
            month: 6,
            day: 1,
            hour: 0,
            ni: 90,
            nj: 46,
            la1: 90_000_000,
            lo1: 0,
            di: 4_000_000,
            dj: 4_000_000,
            scanning_mode: 0b0000_0000, // +i, -j, i consecutive
            template: ProductTemplate::Forecast,
            param_category: 6,
            param_number: 1,
            level_type: 10,
            level_value: 0,
            forecast_hour: 0,
            data_values: vec![50.0; 90 * 46],
        }
    }

    /// Relative humidity of the entire atmosphere as a single layer.
    pub fn relative_humidity() -> Self {
        Self {
            param_category: 1,
            param_number: 1,
            level_type: 200,
            ..Self::cloud_cover()
        }
    }

    /// Total-aerosol optical depth at the given wavelength (nm).
    pub fn aerosol_optical_depth(wavelength_nm: u32) -> Self {
        let n = 90 * 46;
        Self {
            template: ProductTemplate::Aerosol {
                aerosol_type: 62000,
                wavelength_nm: (wavelength_nm, wavelength_nm),
            },
            param_category: 20,
            param_number: 102,
            level_type: 1,
            data_values: vec![0.1; n],
            ..Self::cloud_cover()
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Regular grid starting at (`first_lat`, `first_lng`) with `step`
    /// degrees between points, rows running south.
    pub fn with_grid(mut self, first_lat: f64, first_lng: f64, step: f64, ni: u32, nj: u32) -> Self {
        self.la1 = (first_lat * 1e6).round() as i32;
        self.lo1 = (first_lng * 1e6).round() as i32;
        self.di = (step * 1e6).round() as u32;
        self.dj = self.di;
        self.ni = ni;
        self.nj = nj;
        let fill = self.data_values.first().copied().unwrap_or(0.0);
        self.data_values = vec![fill; (ni * nj) as usize];
        self
    }

    pub fn with_scanning_mode(mut self, flags: u8) -> Self {
        self.scanning_mode = flags;
        self
    }

    pub fn with_parameter(mut self, discipline: u8, category: u8, number: u8) -> Self {
        self.discipline = discipline;
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_template(mut self, template: ProductTemplate) -> Self {
        self.template = template;
        self
    }

    /// Mark the message as one member of an ensemble.
    pub fn with_ensemble_member(self, perturbation: u8, members: u8) -> Self {
        self.with_template(ProductTemplate::EnsembleMember {
            perturbation,
            members,
        })
    }

    /// Turn an aerosol product into one member of an aerosol ensemble.
    pub fn with_aerosol_member(self, perturbation: u8, members: u8) -> Self {
        let ProductTemplate::Aerosol {
            aerosol_type,
            wavelength_nm,
        } = self.template
        else {
            panic!("with_aerosol_member needs an aerosol product");
        };
        self.with_template(ProductTemplate::AerosolMember {
            aerosol_type,
            wavelength_nm,
            perturbation,
            members,
        })
    }

    /// Average over the `window_hours` ending at the forecast hour.
    pub fn with_averaging_window(self, window_hours: u32) -> Self {
        self.with_template(ProductTemplate::Averaged { window_hours })
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = (self.ni * self.nj) as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    /// Explicit values in scan order; NaN marks a missing point.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    pub fn num_points(&self) -> usize {
        (self.ni * self.nj) as usize
    }

    /// Build the complete GRIB2 message bytes.
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];
        let message_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]); // Reserved
        message.push(self.discipline);
        message.push(2); // Edition 2
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);
        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Significance of reference time (start of forecast)
        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // Minute
        section.push(0); // Second
        section.push(0); // Production status (operational)
        section.push(1); // Type of data (forecast)
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&(14u32 + 58).to_be_bytes());
        section.push(3);
        section.push(0); // Source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0); // Octets for optional list
        section.push(0); // Interpretation of optional list
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 3.0

        section.push(6); // Shape of Earth (spherical, 6371229 m)
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // Subdivisions

        let lat_sign = if self.scanning_mode & 0x40 != 0 { 1 } else { -1 };
        let la2 = self.la1 + lat_sign * (self.nj.saturating_sub(1) * self.dj) as i32;
        let lo2 = self.lo1 + (self.ni.saturating_sub(1) * self.di) as i32;
        section.extend_from_slice(&sm32(self.la1));
        section.extend_from_slice(&sm32(self.lo1));
        section.push(48); // Resolution and component flags
        section.extend_from_slice(&sm32(la2));
        section.extend_from_slice(&sm32(lo2));
        section.extend_from_slice(&self.di.to_be_bytes());
        section.extend_from_slice(&self.dj.to_be_bytes());
        section.push(self.scanning_mode);
        section
    }

    /// The 23 octets shared by templates 4.0/4.1/4.8 after parameter
    /// number, and by 4.48/4.49 after the aerosol block.
    fn forecast_block(&self) -> Vec<u8> {
        self.forecast_block_at(self.forecast_hour)
    }

    fn forecast_block_at(&self, forecast_time: u32) -> Vec<u8> {
        let mut block = Vec::new();
        block.push(2); // Type of generating process (forecast)
        block.push(0); // Background generating process
        block.push(96); // Analysis or forecast process (GFS)
        block.extend_from_slice(&0u16.to_be_bytes()); // Hours of cutoff
        block.push(0); // Minutes of cutoff
        block.push(1); // Time range unit (hours)
        block.extend_from_slice(&forecast_time.to_be_bytes());
        block.push(self.level_type);
        block.push(0);
        block.extend_from_slice(&self.level_value.to_be_bytes());
        block.push(255); // No second fixed surface
        block.push(0);
        block.extend_from_slice(&0u32.to_be_bytes());
        block
    }

    fn aerosol_block(aerosol_type: u16, (first, second): (u32, u32)) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&aerosol_type.to_be_bytes());
        body.push(255); // No size interval
        body.push(255);
        body.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        body.push(255);
        body.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        body.push(11); // Wavelength interval: between first and second
        body.push(9); // nm as metres * 10^-9
        body.extend_from_slice(&first.to_be_bytes());
        body.push(9);
        body.extend_from_slice(&second.to_be_bytes());
        body
    }

    /// Forecast block starting at the beginning of the window, followed by
    /// the end time and a single averaging time range.
    fn averaged_body(&self, window_hours: u32) -> Vec<u8> {
        let start = self.forecast_hour.saturating_sub(window_hours);
        let end = chrono::NaiveDate::from_ymd_opt(
            self.year as i32,
            self.month as u32,
            self.day as u32,
        )
        .and_then(|d| d.and_hms_opt(self.hour as u32, 0, 0))
        .expect("valid reference time")
            + chrono::Duration::hours(self.forecast_hour as i64);

        let mut body = self.forecast_block_at(start);
        body.extend_from_slice(&(end.year() as u16).to_be_bytes());
        body.push(end.month() as u8);
        body.push(end.day() as u8);
        body.push(end.hour() as u8);
        body.push(0); // Minute
        body.push(0); // Second
        body.push(1); // Number of time ranges
        body.extend_from_slice(&0u32.to_be_bytes()); // Missing values
        body.push(0); // Statistical process: average
        body.push(2); // Successive times, same forecast time start
        body.push(1); // Time range unit (hours)
        body.extend_from_slice(&(self.forecast_hour - start).to_be_bytes());
        body.push(255); // Continuous processing
        body.extend_from_slice(&0u32.to_be_bytes());
        body
    }

    fn build_section4(&self) -> Vec<u8> {
        let (template, mut body) = match self.template {
            ProductTemplate::Forecast => (0u16, self.forecast_block()),
            ProductTemplate::Unsupported(template) => (template, self.forecast_block()),
            ProductTemplate::Averaged { window_hours } => (8, self.averaged_body(window_hours)),
            ProductTemplate::EnsembleMember {
                perturbation,
                members,
            } => {
                let mut body = self.forecast_block();
                body.push(3); // Positively perturbed forecast
                body.push(perturbation);
                body.push(members);
                (1, body)
            }
            ProductTemplate::Aerosol {
                aerosol_type,
                wavelength_nm,
            } => {
                let mut body = Self::aerosol_block(aerosol_type, wavelength_nm);
                body.extend(self.forecast_block());
                (48, body)
            }
            ProductTemplate::AerosolMember {
                aerosol_type,
                wavelength_nm,
                perturbation,
                members,
            } => {
                let mut body = Self::aerosol_block(aerosol_type, wavelength_nm);
                body.extend(self.forecast_block());
                body.push(3); // Positively perturbed forecast
                body.push(perturbation);
                body.push(members);
                (49, body)
            }
        };

        let mut section = Vec::new();
        let length = 11 + body.len() as u32;
        section.extend_from_slice(&length.to_be_bytes());
        section.push(4);
        section.extend_from_slice(&0u16.to_be_bytes()); // Number of coordinate values
        section.extend_from_slice(&template.to_be_bytes());
        section.push(self.param_category);
        section.push(self.param_number);
        section.append(&mut body);
        section
    }

    fn present_values(&self) -> Vec<f32> {
        self.data_values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect()
    }

    /// (reference value, binary scale factor, bits per value)
    fn packing_params(&self) -> (f32, i16, u8) {
        let present = self.present_values();
        let (min_val, max_val) = present.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &v| (min.min(v), max.max(v)),
        );
        if present.is_empty() {
            return (0.0, 0, 0);
        }
        let range = max_val - min_val;
        if range == 0.0 {
            return (min_val, 0, 0);
        }
        // packed = (value - R) / 2^E must fit in 16 bits
        let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
        (min_val, binary_scale_factor, 16)
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing_params();
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&(self.present_values().len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section.extend_from_slice(&reference_value.to_be_bytes());
        section.extend_from_slice(&sm16(binary_scale_factor));
        section.extend_from_slice(&sm16(0)); // Decimal scale factor
        section.push(bits_per_value);
        section.push(0); // Original field type (floating point)
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        if !self.data_values.iter().any(|v| v.is_nan()) {
            section.extend_from_slice(&6u32.to_be_bytes());
            section.push(6);
            section.push(255); // No bitmap
            return section;
        }

        let mut bitmap = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, v) in self.data_values.iter().enumerate() {
            if !v.is_nan() {
                bitmap[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        section.extend_from_slice(&(6 + bitmap.len() as u32).to_be_bytes());
        section.push(6);
        section.push(0); // Bitmap follows
        section.extend_from_slice(&bitmap);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing_params();
        let mut packed = Vec::new();
        if bits_per_value > 0 {
            let scale = 2.0_f32.powi(binary_scale_factor as i32);
            for v in self.present_values() {
                let value = ((v - reference_value) / scale).round() as u16;
                packed.extend_from_slice(&value.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

/// Concatenate messages into one file image.
pub fn grib2_file(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.concat()
}
