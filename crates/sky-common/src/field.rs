//! Physical variables and raw field arrays.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cycle::SourceKind;
use crate::error::{CommonError, CommonResult};

/// A physical quantity the pipeline extracts from forecast files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    CloudCover,
    RelativeHumidity,
    AerosolOpticalDepth,
}

impl Variable {
    pub const ALL: [Variable; 3] = [
        Variable::CloudCover,
        Variable::RelativeHumidity,
        Variable::AerosolOpticalDepth,
    ];

    pub fn source(&self) -> SourceKind {
        match self {
            Variable::CloudCover | Variable::RelativeHumidity => SourceKind::Deterministic,
            Variable::AerosolOpticalDepth => SourceKind::Ensemble,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Variable::CloudCover => "tcc",
            Variable::RelativeHumidity => "rh",
            Variable::AerosolOpticalDepth => "aod",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Variable::CloudCover | Variable::RelativeHumidity => "%",
            Variable::AerosolOpticalDepth => "1",
        }
    }

    /// Physically plausible range; values outside it are treated as missing.
    pub fn valid_range(&self) -> (f32, f32) {
        match self {
            Variable::CloudCover | Variable::RelativeHumidity => (0.0, 100.0),
            Variable::AerosolOpticalDepth => (0.0, 20.0),
        }
    }

    pub fn is_valid(&self, value: f32) -> bool {
        let (lo, hi) = self.valid_range();
        value.is_finite() && value >= lo && value <= hi
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One variable at one valid hour on the canonical grid.
///
/// Missing cells hold `f32::NAN`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFieldArray {
    pub variable: Variable,
    pub valid_hour: u32,
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl RawFieldArray {
    pub fn new(
        variable: Variable,
        valid_hour: u32,
        width: usize,
        height: usize,
        values: Vec<f32>,
    ) -> CommonResult<Self> {
        if values.len() != width * height {
            return Err(CommonError::DimensionMismatch {
                expected: width * height,
                actual: values.len(),
            });
        }
        Ok(Self {
            variable,
            valid_hour,
            width,
            height,
            values,
        })
    }

    /// A field that could not be produced at all.
    pub fn missing(variable: Variable, valid_hour: u32, width: usize, height: usize) -> Self {
        Self {
            variable,
            valid_hour,
            width,
            height,
            values: vec![f32::NAN; width * height],
        }
    }

    pub fn get(&self, lat_idx: usize, lng_idx: usize) -> Option<f32> {
        if lat_idx >= self.height || lng_idx >= self.width {
            return None;
        }
        self.value_at(lat_idx * self.width + lng_idx)
    }

    /// Value at a flat cell index, `None` when missing.
    pub fn value_at(&self, cell: usize) -> Option<f32> {
        self.values.get(cell).copied().filter(|v| !v.is_nan())
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn is_all_missing(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }

    /// Replace values outside the variable's physical range with NaN.
    pub fn mask_invalid(&mut self) -> usize {
        let variable = self.variable;
        let mut masked = 0;
        for v in self.values.iter_mut() {
            if !v.is_nan() && !variable.is_valid(*v) {
                *v = f32::NAN;
                masked += 1;
            }
        }
        masked
    }
}

/// The three fields scored together for one valid hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourFields {
    pub valid_hour: u32,
    pub cloud_cover: RawFieldArray,
    pub humidity: RawFieldArray,
    pub aod: RawFieldArray,
}

impl HourFields {
    /// Fields for an hour where nothing could be extracted.
    pub fn missing(valid_hour: u32, width: usize, height: usize) -> Self {
        Self {
            valid_hour,
            cloud_cover: RawFieldArray::missing(Variable::CloudCover, valid_hour, width, height),
            humidity: RawFieldArray::missing(Variable::RelativeHumidity, valid_hour, width, height),
            aod: RawFieldArray::missing(Variable::AerosolOpticalDepth, valid_hour, width, height),
        }
    }

    pub fn get(&self, variable: Variable) -> &RawFieldArray {
        match variable {
            Variable::CloudCover => &self.cloud_cover,
            Variable::RelativeHumidity => &self.humidity,
            Variable::AerosolOpticalDepth => &self.aod,
        }
    }

    /// Replace one field. The field keeps its own variable tag.
    pub fn set(&mut self, field: RawFieldArray) {
        match field.variable {
            Variable::CloudCover => self.cloud_cover = field,
            Variable::RelativeHumidity => self.humidity = field,
            Variable::AerosolOpticalDepth => self.aod = field,
        }
    }

    /// Check that every field matches the given grid dimensions.
    pub fn validate(&self, width: usize, height: usize) -> CommonResult<()> {
        for variable in Variable::ALL {
            let field = self.get(variable);
            if field.width != width || field.height != height || field.values.len() != width * height
            {
                return Err(CommonError::DimensionMismatch {
                    expected: width * height,
                    actual: field.values.len(),
                });
            }
        }
        Ok(())
    }
}

/// A field that could not be extracted, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    pub variable: Variable,
    pub valid_hour: u32,
    pub reason: String,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@f{:03}: {}", self.variable, self.valid_hour, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_is_not_zero() {
        let field = RawFieldArray::new(
            Variable::CloudCover,
            0,
            2,
            1,
            vec![0.0, f32::NAN],
        )
        .unwrap();
        assert_eq!(field.get(0, 0), Some(0.0));
        assert_eq!(field.get(0, 1), None);
        assert_eq!(field.missing_count(), 1);
        assert!(!field.is_all_missing());
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = RawFieldArray::new(Variable::CloudCover, 0, 3, 3, vec![0.0; 8]).unwrap_err();
        assert_eq!(
            err,
            CommonError::DimensionMismatch {
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn test_mask_invalid() {
        let mut field = RawFieldArray::new(
            Variable::RelativeHumidity,
            3,
            4,
            1,
            vec![-5.0, 50.0, 100.0, 140.0],
        )
        .unwrap();
        assert_eq!(field.mask_invalid(), 2);
        assert_eq!(field.value_at(0), None);
        assert_eq!(field.value_at(2), Some(100.0));
        assert_eq!(field.value_at(3), None);
    }

    #[test]
    fn test_variable_sources() {
        assert_eq!(Variable::CloudCover.source(), SourceKind::Deterministic);
        assert_eq!(
            Variable::AerosolOpticalDepth.source(),
            SourceKind::Ensemble
        );
        let missing = RawFieldArray::missing(Variable::AerosolOpticalDepth, 6, 3, 2);
        assert!(missing.is_all_missing());
        assert_eq!(missing.values.len(), 6);
    }

    #[test]
    fn test_hour_fields_set_and_validate() {
        let mut fields = HourFields::missing(4, 3, 2);
        assert!(fields.validate(3, 2).is_ok());
        assert!(fields.validate(2, 3).is_err());

        let cloud = RawFieldArray::new(Variable::CloudCover, 4, 3, 2, vec![10.0; 6]).unwrap();
        fields.set(cloud);
        assert_eq!(fields.get(Variable::CloudCover).value_at(5), Some(10.0));
        assert!(fields.get(Variable::RelativeHumidity).is_all_missing());

        let wrong = RawFieldArray::missing(Variable::AerosolOpticalDepth, 4, 2, 2);
        fields.set(wrong);
        assert!(matches!(
            fields.validate(3, 2),
            Err(CommonError::DimensionMismatch { expected: 6, actual: 4 })
        ));
    }
}
