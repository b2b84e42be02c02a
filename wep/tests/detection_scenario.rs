//! Four donuts on a noisy 1000x1000 sensor: two isolated, two blended.
//!
//! The stamps are model templates, so detection sees exactly the donut shape
//! it correlates against. The second blended donut overwrites part of the
//! first, which lowers the first one's correlation peak but keeps it above
//! the detection cut.

use shared::image_proc::simple_normal_array;
use shared::image_proc::test_patterns::{place, PlaceMode};
use shared::image_proc::{DefocalSide, Image};
use wep::{
    select_sources, write_source_file, CoordinateMode, DonutCandidate, DonutDetector, Instrument,
    PixelToSky, SelectionConfig, TableColumns, TemplateProvider,
};

const BLEND_RADIUS: f64 = 160.0;

fn template() -> Image {
    TemplateProvider::model(Instrument::from_name("lsst").unwrap(), 160)
        .template("R22_S11", DefocalSide::Extra, 0.2)
        .unwrap()
}

fn exposure(template: &Image) -> Image {
    let mut data = simple_normal_array((1000, 1000), 0.0, 10.0, 42).unwrap();
    let stamp = template.data();
    place(&mut data, &(stamp * 100.0), 420, 420, PlaceMode::Add);
    place(&mut data, &(stamp * 200.0), 720, 720, PlaceMode::Add);
    place(&mut data, &(stamp * 100.0), 100, 100, PlaceMode::Add);
    place(&mut data, &(stamp * 100.0), 160, 100, PlaceMode::Overwrite);
    Image::new(data).with_sensor("R22_S11").with_pixel_scale(0.2)
}

fn near(candidate: &DonutCandidate, x: f64, y: f64) -> bool {
    (candidate.x_center - x).abs() < 2.0 && (candidate.y_center - y).abs() < 2.0
}

#[test]
fn test_four_donut_field() {
    let _ = env_logger::builder().is_test(true).try_init();

    let template = template();
    let exposure = exposure(&template);
    let detector = DonutDetector::new(template);

    let (candidates, threshold) = detector.detect(&exposure, BLEND_RADIUS, None).unwrap();
    assert!(threshold > 0.0);
    assert_eq!(candidates.len(), 4, "candidates: {candidates:?}");

    let find = |x: f64, y: f64| {
        candidates
            .iter()
            .position(|c| near(c, x, y))
            .unwrap_or_else(|| panic!("no candidate near ({x}, {y}): {candidates:?}"))
    };
    let dim = find(500.0, 500.0);
    let bright = find(800.0, 800.0);
    let upper = find(180.0, 180.0);
    let lower = find(180.0, 240.0);

    assert!(!candidates[dim].blended);
    assert!(!candidates[bright].blended);
    assert!(candidates[upper].blended);
    assert!(candidates[lower].blended);
    assert_eq!(candidates[upper].blended_with, vec![lower]);
    assert_eq!(candidates[lower].blended_with, vec![upper]);
    for c in &candidates {
        assert_eq!(c.blended, c.num_blended_neighbors > 0);
    }

    let ranked = detector.rank_by_flux(&candidates, &exposure).unwrap();
    assert_eq!(ranked.len(), 2);
    assert!(near(&ranked[0], 800.0, 800.0));
    assert!(near(&ranked[1], 500.0, 500.0));
    let ratio = ranked[0].flux.unwrap() / ranked[1].flux.unwrap();
    assert!((ratio - 2.0).abs() < 0.05, "flux ratio {ratio}");
}

#[test]
fn test_detection_is_repeatable() {
    let template = template();
    let exposure = exposure(&template);
    let detector = DonutDetector::new(template);
    let first = detector.detect(&exposure, BLEND_RADIUS, None).unwrap();
    let second = detector.detect(&exposure, BLEND_RADIUS, None).unwrap();
    assert_eq!(first, second);
}

struct FlatSky;

impl PixelToSky for FlatSky {
    fn sky_from_pixel(&self, _sensor: &str, x: f64, y: f64) -> (f64, f64) {
        (x / 18000.0, y / 18000.0)
    }
}

#[test]
fn test_select_and_export() {
    let template = template();
    let exposure = exposure(&template);

    let sources = select_sources(
        &exposure,
        &template,
        &SelectionConfig::default(),
        CoordinateMode::Camera,
        &FlatSky,
    )
    .unwrap();
    assert_eq!(sources.len(), 2);
    // Camera frame flips rows about the sensor height
    assert!((sources[0].y_center - 200.0).abs() < 2.0);
    assert!((sources[1].y_center - 500.0).abs() < 2.0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("R22_S11.txt");
    write_source_file(&path, &sources, TableColumns::Sky).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "# Id\t Ra\t\t Decl\t\t Mag");
    let fields: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0], "0");
    assert_eq!(fields[3], "15.000000");
    let ra: f64 = fields[1].parse().unwrap();
    assert!((ra - sources[0].ra_deg).abs() < 1e-6);
}
