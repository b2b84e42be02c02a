//! Recover a known wavefront from donuts rendered by the solver's own
//! forward model, with both Poisson solvers.

use shared::image_proc::{DefocalSide, Image};
use wep::{SolverOptions, WavefrontEstimator, WavefrontResult};

/// z4..z22 in nm
const TRUTH: [f64; 19] = [
    60.0, -40.0, 30.0, 25.0, -20.0, 15.0, -15.0, 20.0, -10.0, 10.0, -10.0, 8.0, -8.0, 6.0, -6.0,
    5.0, -5.0, 4.0, -4.0,
];

fn round_trip(options: SolverOptions, field: (f64, f64)) -> WavefrontResult {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut estimator = WavefrontEstimator::with_options(&options).unwrap();
    let model = estimator.forward_model().unwrap().clone();
    let intra = Image::new(model.render(&TRUTH, DefocalSide::Intra, field));
    let extra = Image::new(model.render(&TRUTH, DefocalSide::Extra, field));
    estimator.set_image(field, &intra, DefocalSide::Intra).unwrap();
    estimator.set_image(field, &extra, DefocalSide::Extra).unwrap();

    estimator.solve(0.01).unwrap()
}

fn assert_recovered(result: &WavefrontResult) {
    assert!(result.converged, "not converged: {result:?}");
    for (k, (&found, &expected)) in result.zernikes_nm.iter().zip(TRUTH.iter()).enumerate() {
        assert!(
            (found - expected).abs() < 0.5,
            "z{}: found {found:.3} nm, expected {expected} nm",
            k + 4
        );
    }
}

#[test]
fn test_series_expansion_off_axis_round_trip() {
    let options = SolverOptions {
        poisson_solver: "exp".to_string(),
        optical_model: "offAxis".to_string(),
        instrument_name: "lsst".to_string(),
        defocal_distance_mm: Some(1.5),
        image_size_pixels: 160,
        ..SolverOptions::default()
    };
    let result = round_trip(options, (1.0, 0.5));
    assert_recovered(&result);
    assert!(result.iterations <= 30);
}

#[test]
fn test_fft_paraxial_round_trip() {
    let options = SolverOptions {
        poisson_solver: "fft".to_string(),
        optical_model: "paraxial".to_string(),
        instrument_name: "comcam".to_string(),
        defocal_distance_mm: Some(1.0),
        image_size_pixels: 120,
        max_iterations: 150,
        ..SolverOptions::default()
    };
    let result = round_trip(options, (0.0, 0.0));
    assert_recovered(&result);
}

#[test]
fn test_swapped_images_flip_the_wavefront() {
    let options = SolverOptions {
        poisson_solver: "exp".to_string(),
        optical_model: "paraxial".to_string(),
        instrument_name: "comcam".to_string(),
        defocal_distance_mm: Some(1.0),
        image_size_pixels: 120,
        ..SolverOptions::default()
    };
    let mut estimator = WavefrontEstimator::with_options(&options).unwrap();
    let model = estimator.forward_model().unwrap().clone();
    let field = (0.0, 0.0);
    let intra = Image::new(model.render(&[40.0], DefocalSide::Intra, field));
    let extra = Image::new(model.render(&[40.0], DefocalSide::Extra, field));

    estimator.set_image(field, &intra, DefocalSide::Intra).unwrap();
    estimator.set_image(field, &extra, DefocalSide::Extra).unwrap();
    let direct = estimator.solve(0.01).unwrap();

    estimator.set_image(field, &extra, DefocalSide::Intra).unwrap();
    estimator.set_image(field, &intra, DefocalSide::Extra).unwrap();
    let swapped = estimator.solve(0.01).unwrap();

    assert!((direct.zernikes_nm[0] - 40.0).abs() < 0.5);
    assert!((swapped.zernikes_nm[0] + 40.0).abs() < 0.5);
}
