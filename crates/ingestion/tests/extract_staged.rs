//! Extraction from a staged cycle directory of synthetic GRIB2 files.

use std::path::Path;
use std::sync::Arc;

use ingestion::{
    extract_cycle, staged_path, EnsembleReduction, FieldSource, IngestionError, StagedGribSource,
};
use sky_common::{ForecastHorizon, SourceKind, Variable};
use test_utils::{assert_approx_eq, coarse_global_grid, grib2_file, Grib2Builder, ProductTemplate};

fn write(raw_dir: &Path, source: SourceKind, hour: u32, bytes: Vec<u8>) {
    let path = staged_path(raw_dir, source, hour);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn deterministic_file(hour: u32, cloud: f32, humidity: f32) -> Vec<u8> {
    grib2_file(&[
        Grib2Builder::cloud_cover()
            .with_forecast_hour(hour)
            .with_constant_value(cloud)
            .build(),
        Grib2Builder::relative_humidity()
            .with_forecast_hour(hour)
            .with_constant_value(humidity)
            .build(),
    ])
}

fn ensemble_file(hour: u32, aod: f32) -> Vec<u8> {
    grib2_file(&[
        Grib2Builder::aerosol_optical_depth(340)
            .with_forecast_hour(hour)
            .with_constant_value(1.5)
            .build(),
        Grib2Builder::aerosol_optical_depth(545)
            .with_forecast_hour(hour)
            .with_constant_value(aod)
            .build(),
    ])
}

#[test]
fn test_extract_single_field() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), SourceKind::Deterministic, 0, deterministic_file(0, 35.0, 70.0));

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    let cloud = source.extract(Variable::CloudCover, 0).unwrap();
    assert_eq!((cloud.width, cloud.height), (90, 46));
    assert_eq!(cloud.missing_count(), 0);
    assert_approx_eq!(cloud.get(10, 10).unwrap(), 35.0, 0.01);

    let humidity = source.extract(Variable::RelativeHumidity, 0).unwrap();
    assert_approx_eq!(humidity.get(45, 89).unwrap(), 70.0, 0.01);
}

#[test]
fn test_missing_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    assert!(matches!(
        source.extract(Variable::CloudCover, 5),
        Err(IngestionError::MissingFile(_))
    ));
}

#[test]
fn test_out_of_range_values_are_masked() {
    let dir = tempfile::tempdir().unwrap();
    let mut values = vec![40.0f32; 90 * 46];
    values[0] = 150.0;
    values[1] = -3.0;
    write(
        dir.path(),
        SourceKind::Deterministic,
        0,
        grib2_file(&[Grib2Builder::cloud_cover().with_data(values).build()]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    let cloud = source.extract(Variable::CloudCover, 0).unwrap();
    assert_eq!(cloud.get(0, 0), None);
    assert_eq!(cloud.get(0, 1), None);
    assert_approx_eq!(cloud.get(0, 2).unwrap(), 40.0, 0.01);
    assert_eq!(cloud.missing_count(), 2);
}

#[test]
fn test_extract_cycle_with_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path();
    write(raw, SourceKind::Deterministic, 0, deterministic_file(0, 10.0, 20.0));
    write(raw, SourceKind::Deterministic, 1, deterministic_file(1, 11.0, 21.0));
    write(raw, SourceKind::Deterministic, 3, deterministic_file(3, 13.0, 23.0));

    // Truncated payload for hour 2.
    let mut broken = deterministic_file(2, 12.0, 22.0);
    broken.truncate(broken.len() / 4);
    write(raw, SourceKind::Deterministic, 2, broken);

    // Aerosol only at lead time 0; lead time 3 never arrived.
    write(raw, SourceKind::Ensemble, 0, ensemble_file(0, 0.25));

    let source = StagedGribSource::new(raw, Arc::new(coarse_global_grid()));
    let horizon = ForecastHorizon::new(3, 1).unwrap();
    let fields = extract_cycle(&source, &horizon);

    assert_eq!(fields.hours.len(), 4);

    // Hours 1 and 2 reuse the aerosol of lead time 0.
    for hour in 0..3 {
        let aod = &fields.hours[hour].aod;
        assert_eq!(aod.valid_hour, hour as u32);
        assert_approx_eq!(aod.get(20, 20).unwrap(), 0.25, 1e-3);
    }
    assert!(fields.is_missing(Variable::AerosolOpticalDepth, 3));
    assert!(fields.hours[3].aod.is_all_missing());

    assert!(fields.is_missing(Variable::CloudCover, 2));
    assert!(fields.is_missing(Variable::RelativeHumidity, 2));
    assert!(fields.hours[2].cloud_cover.is_all_missing());

    assert_approx_eq!(fields.hours[3].cloud_cover.get(5, 5).unwrap(), 13.0, 0.01);
    assert_approx_eq!(fields.hours[1].humidity.get(5, 5).unwrap(), 21.0, 0.01);
    assert_eq!(fields.missing.len(), 3);
}

#[test]
fn test_unreadable_messages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        SourceKind::Deterministic,
        3,
        grib2_file(&[
            Grib2Builder::relative_humidity()
                .with_template(ProductTemplate::Unsupported(15))
                .with_forecast_hour(3)
                .build(),
            Grib2Builder::relative_humidity()
                .with_forecast_hour(3)
                .with_constant_value(55.0)
                .build(),
            Grib2Builder::cloud_cover()
                .with_template(ProductTemplate::Unsupported(15))
                .with_forecast_hour(3)
                .build(),
            Grib2Builder::cloud_cover()
                .with_forecast_hour(3)
                .with_constant_value(25.0)
                .build(),
        ]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    let cloud = source.extract(Variable::CloudCover, 3).unwrap();
    assert_approx_eq!(cloud.get(12, 40).unwrap(), 25.0, 0.01);
    let humidity = source.extract(Variable::RelativeHumidity, 3).unwrap();
    assert_approx_eq!(humidity.get(12, 40).unwrap(), 55.0, 0.01);
}

#[test]
fn test_file_of_only_unreadable_messages_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        SourceKind::Deterministic,
        0,
        grib2_file(&[Grib2Builder::cloud_cover()
            .with_template(ProductTemplate::Unsupported(15))
            .build()]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    assert!(matches!(
        source.extract(Variable::CloudCover, 0),
        Err(IngestionError::Grib2Parse(_))
    ));
}

#[test]
fn test_averaged_cloud_cover_is_extracted() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        SourceKind::Deterministic,
        6,
        grib2_file(&[Grib2Builder::cloud_cover()
            .with_forecast_hour(6)
            .with_averaging_window(6)
            .with_constant_value(65.0)
            .build()]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    let cloud = source.extract(Variable::CloudCover, 6).unwrap();
    assert_approx_eq!(cloud.get(0, 0).unwrap(), 65.0, 0.01);
}

#[test]
fn test_message_for_another_hour_is_not_used() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        SourceKind::Deterministic,
        6,
        grib2_file(&[Grib2Builder::cloud_cover()
            .with_forecast_hour(0)
            .with_constant_value(90.0)
            .build()]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()));
    assert!(matches!(
        source.extract(Variable::CloudCover, 6),
        Err(IngestionError::NoMatchingMessage { hour: 6, .. })
    ));
}

fn aerosol_members(hour: u32, values: &[f32]) -> Vec<u8> {
    let members = values.len() as u8;
    let messages: Vec<Vec<u8>> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            Grib2Builder::aerosol_optical_depth(545)
                .with_aerosol_member(i as u8 + 1, members)
                .with_forecast_hour(hour)
                .with_constant_value(v)
                .build()
        })
        .collect();
    grib2_file(&messages)
}

#[test]
fn test_aerosol_members_are_reduced() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), SourceKind::Ensemble, 3, aerosol_members(3, &[0.1, 0.3, 0.8]));
    let grid = Arc::new(coarse_global_grid());

    let mean =
        StagedGribSource::new(dir.path(), grid.clone()).with_reduction(EnsembleReduction::Mean);
    let aod = mean.extract(Variable::AerosolOpticalDepth, 4).unwrap();
    assert_eq!(aod.valid_hour, 4);
    assert_approx_eq!(aod.get(7, 7).unwrap(), 0.4, 1e-4);

    let median =
        StagedGribSource::new(dir.path(), grid.clone()).with_reduction(EnsembleReduction::Median);
    let aod = median.extract(Variable::AerosolOpticalDepth, 3).unwrap();
    assert_approx_eq!(aod.get(7, 7).unwrap(), 0.3, 1e-4);

    let below = StagedGribSource::new(dir.path(), grid)
        .with_reduction(EnsembleReduction::ProbabilityBelow(0.5));
    let probability = below.extract(Variable::AerosolOpticalDepth, 5).unwrap();
    assert_approx_eq!(probability.get(7, 7).unwrap(), 2.0 / 3.0, 1e-4);
}

#[test]
fn test_repeated_aerosol_messages_are_members() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        SourceKind::Ensemble,
        0,
        grib2_file(&[
            Grib2Builder::aerosol_optical_depth(545).with_constant_value(0.1).build(),
            Grib2Builder::aerosol_optical_depth(545).with_constant_value(0.3).build(),
        ]),
    );

    let source = StagedGribSource::new(dir.path(), Arc::new(coarse_global_grid()))
        .with_reduction(EnsembleReduction::Mean);
    let aod = source.extract(Variable::AerosolOpticalDepth, 0).unwrap();
    assert_approx_eq!(aod.get(30, 60).unwrap(), 0.2, 1e-4);
}
