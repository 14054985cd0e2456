//! Message scanning and decoding.

use std::io::Cursor;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Grib2Error, Result};
use crate::sections::{
    self, Bitmap, DataRepresentation, DataSection, GridDefinition, Identification, Indicator,
    ProductDefinition,
};
use crate::unpacking::{unpack_simple, SimplePacking};

/// One decoded GRIB2 message (a single field).
#[derive(Debug, Clone)]
pub struct Grib2Message {
    /// Byte offset of the message within its file.
    pub offset: usize,
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
    /// The complete message bytes, `GRIB` through `7777`.
    pub raw_data: Bytes,
}

impl Grib2Message {
    /// Parse a complete message.
    pub fn parse(raw_data: Bytes, offset: usize) -> Result<Self> {
        let data = raw_data.as_ref();
        let indicator = sections::parse_indicator(data)?;
        let identification = sections::parse_identification(data)?;
        let grid_definition = sections::parse_grid_definition(data)?;
        let product_definition =
            sections::parse_product_definition(data, indicator.discipline)?;
        let data_representation = sections::parse_data_representation(data)?;
        let bitmap = sections::parse_bitmap(data)?;
        let data_section = sections::parse_data_section(data)?;

        Ok(Self {
            offset,
            indicator,
            identification,
            grid_definition,
            product_definition,
            data_representation,
            bitmap,
            data_section,
            raw_data,
        })
    }

    /// Parameter short name, e.g. `TCDC`.
    pub fn parameter(&self) -> &str {
        &self.product_definition.parameter_short_name
    }

    pub fn discipline(&self) -> u8 {
        self.indicator.discipline
    }

    /// (discipline, category, number)
    pub fn parameter_code(&self) -> (u8, u8, u8) {
        (
            self.indicator.discipline,
            self.product_definition.parameter_category,
            self.product_definition.parameter_number,
        )
    }

    /// Grid dimensions as (rows, columns).
    pub fn grid_dims(&self) -> (u32, u32) {
        (self.grid_definition.nj, self.grid_definition.ni)
    }

    pub fn forecast_hour(&self) -> u32 {
        self.product_definition.forecast_hour
    }

    /// Decode all grid point values in the message's scan order.
    ///
    /// Missing points (bitmap-masked or outside the packed range) are
    /// `f32::NAN`.
    pub fn unpack_data(&self) -> Result<Vec<f32>> {
        let num_points = self.grid_definition.num_points as usize;
        let bitmap = self
            .bitmap
            .as_ref()
            .filter(|b| b.is_present())
            .map(|b| b.data.as_ref());

        let values = match self.data_representation.template {
            0 => {
                let dr = &self.data_representation;
                unpack_simple(
                    &self.data_section.data,
                    num_points,
                    SimplePacking {
                        reference_value: dr.reference_value,
                        binary_scale_factor: dr.binary_scale_factor,
                        decimal_scale_factor: dr.decimal_scale_factor,
                        bits_per_value: dr.bits_per_value,
                    },
                    bitmap,
                )?
            }
            template => {
                debug!(
                    template,
                    offset = self.offset,
                    "Delegating non-simple packing to grib crate"
                );
                self.unpack_with_grib_crate()?
            }
        };

        if values.len() != num_points {
            return Err(Grib2Error::UnpackingError(format!(
                "Decoded {} values for a grid of {} points",
                values.len(),
                num_points
            )));
        }
        Ok(values)
    }

    fn unpack_with_grib_crate(&self) -> Result<Vec<f32>> {
        let grib_file = grib::from_reader(Cursor::new(self.raw_data.as_ref()))
            .map_err(|e| Grib2Error::UnpackingError(format!("grib crate: {}", e)))?;

        let (_, submsg) = grib_file
            .iter()
            .next()
            .ok_or_else(|| Grib2Error::UnpackingError("grib crate found no submessage".into()))?;
        let decoder = grib::Grib2SubmessageDecoder::from(submsg)
            .map_err(|e| Grib2Error::UnpackingError(format!("grib crate decoder: {}", e)))?;
        let values = decoder
            .dispatch()
            .map_err(|e| Grib2Error::UnpackingError(format!("grib crate dispatch: {}", e)))?;
        Ok(values.collect())
    }
}

/// Sequential reader over the messages of a GRIB2 file.
pub struct Grib2Reader {
    data: Bytes,
    offset: usize,
}

impl Grib2Reader {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Offsets and lengths of every message, without parsing them.
    ///
    /// Fails if the messages do not chain exactly to the end of the buffer.
    pub fn scan(data: &[u8]) -> Result<Vec<(usize, usize)>> {
        let mut spans = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let indicator = sections::parse_indicator(&data[offset..])?;
            let length = indicator.message_length as usize;
            if length < 20 || offset + length > data.len() {
                return Err(Grib2Error::Truncated {
                    offset,
                    declared: length,
                    available: data.len() - offset,
                });
            }
            if &data[offset + length - 4..offset + length] != b"7777" {
                return Err(Grib2Error::InvalidFormat(format!(
                    "Message at offset {} does not end with 7777",
                    offset
                )));
            }
            spans.push((offset, length));
            offset += length;
        }
        Ok(spans)
    }

    /// Next message, or `None` at end of data.
    ///
    /// Bytes between messages are skipped up to the next `GRIB` marker.
    /// After an error the reader is positioned past the offending message,
    /// so reading can go on unless the error is a truncation.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message>> {
        let remaining = &self.data[self.offset.min(self.data.len())..];
        let Some(start) = remaining.windows(4).position(|w| w == b"GRIB") else {
            self.offset = self.data.len();
            return Ok(None);
        };
        if start > 0 {
            warn!(
                skipped = start,
                offset = self.offset,
                "Skipping bytes before GRIB marker"
            );
        }
        let offset = self.offset + start;
        let indicator = match sections::parse_indicator(&self.data[offset..]) {
            Ok(indicator) => indicator,
            Err(e) => {
                // Resume the search after this marker.
                self.offset = offset + 4;
                return Err(e);
            }
        };
        let length = indicator.message_length as usize;
        if length < 20 {
            self.offset = offset + 4;
            return Err(Grib2Error::InvalidFormat(format!(
                "Message at offset {} declares {} bytes",
                offset, length
            )));
        }
        if offset + length > self.data.len() {
            self.offset = self.data.len();
            return Err(Grib2Error::Truncated {
                offset,
                declared: length,
                available: self.data.len() - offset,
            });
        }

        self.offset = offset + length;
        let raw = self.data.slice(offset..offset + length);
        Grib2Message::parse(raw, offset).map(Some)
    }
}

impl Iterator for Grib2Reader {
    type Item = Result<Grib2Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}
