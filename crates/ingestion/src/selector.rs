//! Choosing the GRIB2 messages that carry each tracked variable.

use grib2_parser::{GridDefinition, Grib2Message, ProductDefinition};
use sky_common::{SourceKind, Variable};
use tracing::{debug, warn};

use crate::error::{IngestionError, Result};

/// Aerosol type code for total aerosol (Code Table 4.233).
pub const TOTAL_AEROSOL: u16 = 62000;

/// Preferred wavelength for aerosol optical depth, nanometres.
pub const PREFERRED_WAVELENGTH_NM: f64 = 545.0;

/// Visible band accepted for aerosol optical depth, nanometres.
pub const VISIBLE_BAND_NM: (f64, f64) = (400.0, 700.0);

/// Entire atmosphere (considered as a single layer).
const LEVEL_ENTIRE_ATMOSPHERE: u8 = 10;
const LEVEL_ATMOSPHERE_SINGLE_LAYER: u8 = 200;

/// Matching rules for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelector {
    pub variable: Variable,
    /// (discipline, category, number)
    pub parameter: (u8, u8, u8),
    pub level_types: &'static [u8],
    pub aerosol_type: Option<u16>,
}

/// Decoded values of the chosen message(s), in source scan order.
#[derive(Debug, Clone)]
pub struct SelectedField {
    pub grid: GridDefinition,
    /// One entry for a deterministic field, one per member for an ensemble.
    pub members: Vec<Vec<f32>>,
}

impl FieldSelector {
    pub fn for_variable(variable: Variable) -> Self {
        match variable {
            Variable::CloudCover => Self {
                variable,
                parameter: (0, 6, 1),
                level_types: &[LEVEL_ENTIRE_ATMOSPHERE, LEVEL_ATMOSPHERE_SINGLE_LAYER],
                aerosol_type: None,
            },
            Variable::RelativeHumidity => Self {
                variable,
                parameter: (0, 1, 1),
                level_types: &[LEVEL_ATMOSPHERE_SINGLE_LAYER],
                aerosol_type: None,
            },
            Variable::AerosolOpticalDepth => Self {
                variable,
                parameter: (0, 20, 102),
                level_types: &[],
                aerosol_type: Some(TOTAL_AEROSOL),
            },
        }
    }

    pub fn matches(&self, discipline: u8, product: &ProductDefinition) -> bool {
        let code = (
            discipline,
            product.parameter_category,
            product.parameter_number,
        );
        if code != self.parameter {
            return false;
        }
        if !self.level_types.is_empty() && !self.level_types.contains(&product.level_type) {
            return false;
        }
        match self.aerosol_type {
            None => true,
            Some(wanted) => product.aerosol.is_some_and(|a| {
                a.aerosol_type == wanted
                    && a.wavelength.within_nm(VISIBLE_BAND_NM.0, VISIBLE_BAND_NM.1)
            }),
        }
    }

    /// Pick and decode the field valid at `hour` from a file's messages.
    ///
    /// Aerosol bands prefer 545 nm and fall back to the first visible band
    /// in file order. Messages of the ensemble source, and any message
    /// carrying a perturbation number, are members and all kept. Among
    /// several deterministic candidates the one with the fewest missing
    /// values wins.
    pub fn select(&self, messages: &[Grib2Message], hour: u32) -> Result<SelectedField> {
        let matching: Vec<&Grib2Message> = messages
            .iter()
            .filter(|m| self.matches(m.discipline(), &m.product_definition))
            .collect();
        let mut candidates: Vec<&Grib2Message> = matching
            .iter()
            .copied()
            .filter(|m| m.forecast_hour() == hour)
            .collect();

        if candidates.is_empty() {
            if !matching.is_empty() {
                let found: Vec<u32> = matching.iter().map(|m| m.forecast_hour()).collect();
                warn!(
                    variable = %self.variable,
                    hour,
                    ?found,
                    "Messages are for other forecast hours"
                );
            }
            return Err(IngestionError::NoMatchingMessage {
                variable: self.variable,
                hour,
            });
        }

        if self.aerosol_type.is_some() {
            candidates = prefer_band(candidates);
        }

        let is_ensemble = self.variable.source() == SourceKind::Ensemble
            || candidates
                .iter()
                .any(|m| m.product_definition.perturbation_number.is_some());

        let grid = candidates[0].grid_definition.clone();
        let mut decoded: Vec<(usize, Vec<f32>)> = Vec::with_capacity(candidates.len());
        let mut first_error = None;

        for msg in candidates {
            if msg.grid_definition != grid {
                warn!(
                    variable = %self.variable,
                    offset = msg.offset,
                    "Skipping member on a different grid"
                );
                continue;
            }
            match msg.unpack_data() {
                Ok(values) => {
                    let missing = values.iter().filter(|v| v.is_nan()).count();
                    if missing == values.len() {
                        debug!(variable = %self.variable, offset = msg.offset, "Candidate is all missing");
                        continue;
                    }
                    decoded.push((missing, values));
                }
                Err(e) => {
                    warn!(
                        variable = %self.variable,
                        offset = msg.offset,
                        error = %e,
                        "Failed to unpack candidate"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if decoded.is_empty() {
            return Err(match first_error {
                Some(e) => e.into(),
                None => IngestionError::AllMissing {
                    variable: self.variable,
                    hour,
                },
            });
        }

        let members = if is_ensemble {
            decoded.into_iter().map(|(_, v)| v).collect()
        } else {
            // min_by_key keeps the first of equal minima.
            let best = decoded
                .into_iter()
                .min_by_key(|(missing, _)| *missing)
                .map(|(_, v)| v);
            best.into_iter().collect()
        };

        Ok(SelectedField { grid, members })
    }
}

/// Keep only the messages of the preferred wavelength band.
fn prefer_band(candidates: Vec<&Grib2Message>) -> Vec<&Grib2Message> {
    let band_of = |m: &Grib2Message| m.product_definition.aerosol.map(|a| a.wavelength);

    let preferred = candidates
        .iter()
        .filter_map(|m| band_of(m))
        .find(|w| w.contains_nm(PREFERRED_WAVELENGTH_NM))
        .or_else(|| candidates.iter().find_map(|m| band_of(m)));

    match preferred {
        Some(band) => candidates
            .into_iter()
            .filter(|m| band_of(m) == Some(band))
            .collect(),
        None => candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use grib2_parser::Grib2Reader;
    use test_utils::Grib2Builder;

    fn parse(messages: Vec<Vec<u8>>) -> Vec<Grib2Message> {
        let file = test_utils::grib2_file(&messages);
        Grib2Reader::new(Bytes::from(file))
            .collect::<grib2_parser::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_matches_levels() {
        let selector = FieldSelector::for_variable(Variable::RelativeHumidity);
        let messages = parse(vec![
            Grib2Builder::relative_humidity().with_level(100, 50000).build(),
            Grib2Builder::relative_humidity().build(),
        ]);
        assert!(!selector.matches(0, &messages[0].product_definition));
        assert!(selector.matches(0, &messages[1].product_definition));
    }

    #[test]
    fn test_no_match_is_error() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let messages = parse(vec![Grib2Builder::relative_humidity().build()]);
        assert!(matches!(
            selector.select(&messages, 3),
            Err(IngestionError::NoMatchingMessage { hour: 3, .. })
        ));
    }

    #[test]
    fn test_other_forecast_hours_do_not_match() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let messages = parse(vec![
            Grib2Builder::cloud_cover().with_forecast_hour(0).with_constant_value(90.0).build(),
            Grib2Builder::cloud_cover().with_forecast_hour(6).with_constant_value(20.0).build(),
        ]);
        let selected = selector.select(&messages, 6).unwrap();
        assert!((selected.members[0][0] - 20.0).abs() < 0.01);
        assert!(matches!(
            selector.select(&messages, 3),
            Err(IngestionError::NoMatchingMessage { hour: 3, .. })
        ));
    }

    #[test]
    fn test_averaged_cloud_cover_matches_window_end() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let messages = parse(vec![Grib2Builder::cloud_cover()
            .with_forecast_hour(3)
            .with_averaging_window(3)
            .with_constant_value(45.0)
            .build()]);
        let selected = selector.select(&messages, 3).unwrap();
        assert!((selected.members[0][0] - 45.0).abs() < 0.01);
    }

    #[test]
    fn test_aerosol_messages_are_members() {
        let selector = FieldSelector::for_variable(Variable::AerosolOpticalDepth);
        let messages = parse(vec![
            Grib2Builder::aerosol_optical_depth(545).with_constant_value(0.1).build(),
            Grib2Builder::aerosol_optical_depth(340).with_constant_value(0.9).build(),
            Grib2Builder::aerosol_optical_depth(545).with_constant_value(0.3).build(),
        ]);
        let selected = selector.select(&messages, 0).unwrap();
        assert_eq!(selected.members.len(), 2);
        assert!((selected.members[1][0] - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_prefers_545nm_band() {
        let selector = FieldSelector::for_variable(Variable::AerosolOpticalDepth);
        let messages = parse(vec![
            Grib2Builder::aerosol_optical_depth(440).with_constant_value(0.4).build(),
            Grib2Builder::aerosol_optical_depth(545).with_constant_value(0.2).build(),
            Grib2Builder::aerosol_optical_depth(1020).with_constant_value(0.9).build(),
        ]);
        let selected = selector.select(&messages, 0).unwrap();
        assert_eq!(selected.members.len(), 1);
        assert!((selected.members[0][0] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_falls_back_to_first_visible_band() {
        let selector = FieldSelector::for_variable(Variable::AerosolOpticalDepth);
        let messages = parse(vec![
            Grib2Builder::aerosol_optical_depth(340).with_constant_value(0.7).build(),
            Grib2Builder::aerosol_optical_depth(500).with_constant_value(0.3).build(),
            Grib2Builder::aerosol_optical_depth(600).with_constant_value(0.5).build(),
        ]);
        let selected = selector.select(&messages, 0).unwrap();
        assert!((selected.members[0][0] - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_fewest_missing_wins() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let mut sparse = vec![30.0f32; 6];
        sparse[0] = f32::NAN;
        sparse[1] = f32::NAN;
        let mut dense = vec![60.0f32; 6];
        dense[5] = f32::NAN;
        let messages = parse(vec![
            Grib2Builder::cloud_cover().with_grid(10.0, 0.0, 10.0, 3, 2).with_data(sparse).build(),
            Grib2Builder::cloud_cover().with_grid(10.0, 0.0, 10.0, 3, 2).with_data(dense).build(),
        ]);
        let selected = selector.select(&messages, 0).unwrap();
        assert_eq!(selected.members.len(), 1);
        assert!((selected.members[0][0] - 60.0).abs() < 0.01);
    }

    #[test]
    fn test_all_missing_is_absent() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let messages = parse(vec![Grib2Builder::cloud_cover()
            .with_grid(10.0, 0.0, 10.0, 2, 1)
            .with_data(vec![f32::NAN, f32::NAN])
            .build()]);
        assert!(matches!(
            selector.select(&messages, 0),
            Err(IngestionError::AllMissing { .. })
        ));
    }

    #[test]
    fn test_keeps_every_ensemble_member() {
        let selector = FieldSelector::for_variable(Variable::CloudCover);
        let messages = parse(
            (1..=3)
                .map(|p| {
                    Grib2Builder::cloud_cover()
                        .with_ensemble_member(p, 3)
                        .with_constant_value(10.0 * p as f32)
                        .build()
                })
                .collect(),
        );
        let selected = selector.select(&messages, 0).unwrap();
        assert_eq!(selected.members.len(), 3);
        assert!((selected.members[2][0] - 30.0).abs() < 0.01);
    }
}
