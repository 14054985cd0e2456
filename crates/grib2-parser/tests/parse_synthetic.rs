//! End-to-end parsing of synthetic GRIB2 files.

use bytes::Bytes;
use grib2_parser::{Grib2Error, Grib2Reader};
use test_utils::{
    assert_approx_eq, create_cloud_cover_grid, grib2_file, Grib2Builder, ProductTemplate,
};

#[test]
fn test_cloud_cover_message_metadata() {
    let data = Grib2Builder::cloud_cover()
        .with_reference_time(2024, 3, 9, 12)
        .with_forecast_hour(7)
        .build();

    let mut reader = Grib2Reader::new(Bytes::from(data));
    let msg = reader.next_message().unwrap().expect("one message");

    assert_eq!(msg.parameter(), "TCDC");
    assert_eq!(msg.parameter_code(), (0, 6, 1));
    assert_eq!(msg.identification.center, 7);
    assert_eq!(msg.identification.reference_time.to_rfc3339(), "2024-03-09T12:00:00+00:00");
    assert_eq!(msg.forecast_hour(), 7);
    assert_eq!(msg.product_definition.level_type, 10);
    assert_eq!(msg.grid_dims(), (46, 90));

    let grid = &msg.grid_definition;
    assert_approx_eq!(grid.first_latitude(), 90.0, 1e-9);
    assert_approx_eq!(grid.last_latitude(), -90.0, 1e-9);
    assert_approx_eq!(grid.last_longitude(), 356.0, 1e-9);
    assert_approx_eq!(grid.i_increment(), 4.0, 1e-9);
    assert!(!grid.scan_mode.j_positive);

    assert!(reader.next_message().unwrap().is_none());
}

#[test]
fn test_values_unpack_within_quantization() {
    let expected = create_cloud_cover_grid(90, 46);
    let data = Grib2Builder::cloud_cover().with_data(expected.clone()).build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    let values = msg.unpack_data().unwrap();
    assert_eq!(values.len(), expected.len());
    for (got, want) in values.iter().zip(&expected) {
        assert_approx_eq!(*got, *want, 0.01);
    }
}

#[test]
fn test_bitmap_masked_points_are_nan() {
    let mut expected = vec![20.0f32; 12];
    expected[3] = f32::NAN;
    expected[7] = f32::NAN;
    expected[11] = 80.0;
    let data = Grib2Builder::relative_humidity()
        .with_grid(10.0, 0.0, 1.0, 4, 3)
        .with_data(expected.clone())
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    assert_eq!(msg.parameter(), "RH");
    assert!(msg.bitmap.as_ref().is_some_and(|b| b.is_present()));
    assert_eq!(msg.data_representation.num_data_points, 10);

    let values = msg.unpack_data().unwrap();
    assert!(values[3].is_nan());
    assert!(values[7].is_nan());
    assert_approx_eq!(values[0], 20.0, 0.01);
    assert_approx_eq!(values[11], 80.0, 0.01);
}

#[test]
fn test_negative_binary_scale_factor() {
    // Small ranges need 2^E < 1; E is stored sign-and-magnitude.
    let data = Grib2Builder::aerosol_optical_depth(545)
        .with_grid(0.0, 0.0, 1.0, 3, 1)
        .with_data(vec![0.05, 0.12, 0.31])
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    assert!(msg.data_representation.binary_scale_factor < 0);
    let values = msg.unpack_data().unwrap();
    assert_approx_eq!(values[0], 0.05, 1e-4);
    assert_approx_eq!(values[1], 0.12, 1e-4);
    assert_approx_eq!(values[2], 0.31, 1e-4);
}

#[test]
fn test_aerosol_template_metadata() {
    let data = Grib2Builder::aerosol_optical_depth(545)
        .with_forecast_hour(9)
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    assert_eq!(msg.product_definition.template, 48);
    assert_eq!(msg.parameter(), "AOTK");
    assert_eq!(msg.forecast_hour(), 9);
    let aerosol = msg.product_definition.aerosol.expect("aerosol block");
    assert_eq!(aerosol.aerosol_type, 62000);
    assert_approx_eq!(aerosol.wavelength.first_nm, 545.0, 1e-6);
    assert!(aerosol.wavelength.contains_nm(545.0));
}

#[test]
fn test_ensemble_member_template() {
    let data = Grib2Builder::cloud_cover()
        .with_ensemble_member(4, 30)
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    assert_eq!(msg.product_definition.template, 1);
    assert_eq!(msg.product_definition.perturbation_number, Some(4));
}

#[test]
fn test_multi_message_file() {
    let file = grib2_file(&[
        Grib2Builder::cloud_cover().build(),
        Grib2Builder::relative_humidity().build(),
        Grib2Builder::aerosol_optical_depth(550).build(),
    ]);

    let spans = Grib2Reader::scan(&file).unwrap();
    assert_eq!(spans.len(), 3);
    assert_eq!(spans[0].0, 0);
    assert_eq!(spans[2].0 + spans[2].1, file.len());

    let names: Vec<String> = Grib2Reader::new(Bytes::from(file))
        .map(|m| m.unwrap().parameter().to_string())
        .collect();
    assert_eq!(names, vec!["TCDC", "RH", "AOTK"]);
}

#[test]
fn test_truncated_file_is_rejected() {
    let mut file = Grib2Builder::cloud_cover().build();
    file.truncate(file.len() - 10);

    assert!(matches!(
        Grib2Reader::scan(&file),
        Err(Grib2Error::Truncated { .. })
    ));
    let mut reader = Grib2Reader::new(Bytes::from(file));
    assert!(matches!(
        reader.next_message(),
        Err(Grib2Error::Truncated { .. })
    ));
    assert!(reader.next_message().unwrap().is_none());
}

#[test]
fn test_leading_garbage_is_skipped() {
    let mut file = b"garbage!".to_vec();
    file.extend(Grib2Builder::cloud_cover().build());

    let msg = Grib2Reader::new(Bytes::from(file)).next().unwrap().unwrap();
    assert_eq!(msg.offset, 8);
    assert_eq!(msg.parameter(), "TCDC");
}

#[test]
fn test_averaged_template_is_valid_at_window_end() {
    let data = Grib2Builder::cloud_cover()
        .with_forecast_hour(6)
        .with_averaging_window(3)
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    assert_eq!(msg.product_definition.template, 8);
    assert_eq!(msg.product_definition.statistical_process, Some(0));
    assert_eq!(msg.forecast_hour(), 6);
    assert_eq!(msg.parameter(), "TCDC");
}

#[test]
fn test_aerosol_member_template() {
    let data = Grib2Builder::aerosol_optical_depth(545)
        .with_aerosol_member(2, 5)
        .with_forecast_hour(3)
        .build();

    let msg = Grib2Reader::new(Bytes::from(data)).next().unwrap().unwrap();
    let product = &msg.product_definition;
    assert_eq!(product.template, 49);
    assert_eq!(product.perturbation_number, Some(2));
    assert_eq!(product.ensemble_size, Some(5));
    assert_eq!(product.forecast_hour, 3);
    let aerosol = product.aerosol.expect("aerosol block");
    assert_eq!(aerosol.aerosol_type, 62000);
    assert!(aerosol.wavelength.contains_nm(545.0));
}

#[test]
fn test_reader_continues_after_unsupported_template() {
    let file = grib2_file(&[
        Grib2Builder::relative_humidity()
            .with_template(ProductTemplate::Unsupported(15))
            .build(),
        Grib2Builder::cloud_cover().build(),
    ]);

    let mut reader = Grib2Reader::new(Bytes::from(file));
    assert!(matches!(
        reader.next_message(),
        Err(Grib2Error::UnsupportedTemplate {
            section: 4,
            template: 15
        })
    ));
    let msg = reader.next_message().unwrap().expect("second message");
    assert_eq!(msg.parameter(), "TCDC");
    assert!(reader.next_message().unwrap().is_none());
}

#[test]
fn test_reader_skips_marker_with_bad_header() {
    // A GRIB marker followed by an edition 1 header.
    let mut file = b"GRIB\0\0\0\x01\0\0\0\0\0\0\0\x20".to_vec();
    file.extend(Grib2Builder::cloud_cover().build());

    let mut reader = Grib2Reader::new(Bytes::from(file));
    let err = reader.next_message().unwrap_err();
    assert!(!err.is_truncation());
    let msg = reader.next_message().unwrap().expect("message after bad header");
    assert_eq!(msg.offset, 16);
}
