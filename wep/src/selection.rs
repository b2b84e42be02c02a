//! Per-sensor selection of wavefront sources.
//!
//! [`select_sources`] turns one sensor exposure into the list of donuts a
//! wavefront pipeline should use:
//!
//! 1. detect donuts by template correlation
//! 2. without deblending, keep unblended donuts ranked by flux; with
//!    deblending, keep donuts with at most one blended neighbour
//! 3. cap the count at `max_sensor_stars`
//! 4. drop donuts whose stamp would leave the frame
//! 5. convert to the requested pixel frame and then to sky coordinates
//!
//! An empty selection is an error, so callers can tell "nothing usable" from
//! success.

use serde::{Deserialize, Serialize};
use shared::image_proc::Image;
use thiserror::Error;

use crate::blend::DonutCandidate;
use crate::config::{ConfigError, RetryConfig, SelectionConfig};
use crate::detection::{DetectionError, DonutDetector};
use crate::flux::FluxError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Flux(#[from] FluxError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no sources meet the selection criteria on sensor {sensor}")]
    NoSources { sensor: String },

    #[error("exposure has no sensor name")]
    MissingSensor,

    #[error(
        "found {found} of {required} required sources before the threshold fell below {floor} (last threshold {threshold})"
    )]
    ThresholdFloorReached {
        found: usize,
        required: usize,
        threshold: f64,
        floor: f64,
    },

    #[error("{candidates} candidates but {magnitudes} magnitudes")]
    LengthMismatch { candidates: usize, magnitudes: usize },
}

/// Pixel frame reported for selected sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoordinateMode {
    /// Exposure pixel coordinates, unchanged
    #[default]
    Exposure,
    /// Camera frame: rows counted from the top edge, `y -> height - y`
    Camera,
}

impl CoordinateMode {
    fn apply(&self, x: f64, y: f64, height: usize) -> (f64, f64) {
        match self {
            CoordinateMode::Exposure => (x, y),
            CoordinateMode::Camera => (x, height as f64 - y),
        }
    }
}

/// Astrometric solution of one or more sensors.
pub trait PixelToSky {
    /// `(ra, dec)` in degrees of pixel `(x, y)` on `sensor`.
    fn sky_from_pixel(&self, sensor: &str, x: f64, y: f64) -> (f64, f64);
}

/// A donut selected for wavefront sensing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSource {
    pub sensor: String,
    /// Column in the requested pixel frame
    pub x_center: f64,
    /// Row in the requested pixel frame
    pub y_center: f64,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub mag: f64,
    pub flux: Option<f64>,
    pub num_blended_neighbors: usize,
}

/// Run detection, lowering the threshold until at least
/// `retry.min_sources` candidates are found.
///
/// The first attempt estimates the threshold. Each retry multiplies the last
/// threshold by `retry.decay`; once it would fall below `retry.floor` the
/// search stops with [`SelectionError::ThresholdFloorReached`].
pub fn detect_with_minimum(
    detector: &DonutDetector,
    exposure: &Image,
    blend_radius: f64,
    retry: &RetryConfig,
) -> Result<(Vec<DonutCandidate>, f64), SelectionError> {
    if !(retry.decay > 0.0 && retry.decay < 1.0) {
        return Err(ConfigError::InvalidValue {
            field: "decay",
            value: retry.decay.to_string(),
            reason: "must lie strictly between 0 and 1",
        }
        .into());
    }

    let (mut candidates, mut threshold) = detector.detect(exposure, blend_radius, None)?;
    while candidates.len() < retry.min_sources {
        let next = threshold * retry.decay;
        if next < retry.floor {
            return Err(SelectionError::ThresholdFloorReached {
                found: candidates.len(),
                required: retry.min_sources,
                threshold,
                floor: retry.floor,
            });
        }
        log::debug!(
            "found {} of {} sources at threshold {:.4}, retrying at {:.4}",
            candidates.len(),
            retry.min_sources,
            threshold,
            next
        );
        let (found, used) = detector.detect(exposure, blend_radius, Some(next))?;
        candidates = found;
        threshold = used;
    }
    Ok((candidates, threshold))
}

/// Indices of sources to keep under a magnitude blend policy: every
/// unblended source, then every blended source at least `blend_mag_diff`
/// magnitudes brighter than all of its neighbours.
///
/// `mags` come from a reference catalog matched to the candidates by the
/// caller, so [`select_sources`] does not apply this policy itself.
pub fn filter_blends_by_magnitude(
    candidates: &[DonutCandidate],
    mags: &[f64],
    blend_mag_diff: f64,
) -> Result<Vec<usize>, SelectionError> {
    if candidates.len() != mags.len() {
        return Err(SelectionError::LengthMismatch {
            candidates: candidates.len(),
            magnitudes: mags.len(),
        });
    }

    let mut keep: Vec<usize> = (0..candidates.len())
        .filter(|&i| !candidates[i].blended)
        .collect();
    keep.extend((0..candidates.len()).filter(|&i| {
        let c = &candidates[i];
        c.blended
            && c.blended_with
                .iter()
                .filter_map(|&j| mags.get(j))
                .all(|&neighbor| neighbor - mags[i] >= blend_mag_diff)
    }));
    Ok(keep)
}

fn magnitude(flux: Option<f64>, config: &SelectionConfig) -> f64 {
    match (flux, config.magnitude_zero_point) {
        (Some(f), Some(zero_point)) if f > 0.0 => zero_point - 2.5 * f.log10(),
        _ => config.default_magnitude,
    }
}

/// Select wavefront sources on one sensor exposure.
///
/// The exposure must carry its sensor name. With `config.retry` set,
/// detection goes through [`detect_with_minimum`].
pub fn select_sources(
    exposure: &Image,
    template: &Image,
    config: &SelectionConfig,
    mode: CoordinateMode,
    astrometry: &dyn PixelToSky,
) -> Result<Vec<SelectedSource>, SelectionError> {
    let sensor = exposure.sensor().ok_or(SelectionError::MissingSensor)?;
    let no_sources = || SelectionError::NoSources {
        sensor: sensor.to_string(),
    };

    let detector = DonutDetector::with_config(template.clone(), config.detection.clone());
    let blend_radius = config.detection.blend_radius;
    let (candidates, _) = match &config.retry {
        Some(retry) => detect_with_minimum(&detector, exposure, blend_radius, retry)?,
        None => detector.detect(exposure, blend_radius, None)?,
    };

    let mut chosen = if config.do_deblending {
        candidates
            .into_iter()
            .filter(|c| c.num_blended_neighbors <= 1)
            .collect()
    } else {
        match detector.rank_by_flux(&candidates, exposure) {
            Ok(ranked) => ranked,
            Err(FluxError::NoUnblendedSources) => return Err(no_sources()),
            Err(e) => return Err(e.into()),
        }
    };
    if let Some(max) = config.max_sensor_stars {
        chosen.truncate(max);
    }

    let margin = config.donut_img_size as f64;
    let (width, height) = (exposure.width() as f64, exposure.height() as f64);
    let selected: Vec<SelectedSource> = chosen
        .into_iter()
        .filter(|c| {
            c.x_center > margin
                && c.y_center > margin
                && c.x_center < width - margin
                && c.y_center < height - margin
        })
        .map(|c| {
            let (x, y) = mode.apply(c.x_center, c.y_center, exposure.height());
            let (ra_deg, dec_deg) = astrometry.sky_from_pixel(sensor, x, y);
            SelectedSource {
                sensor: sensor.to_string(),
                x_center: x,
                y_center: y,
                ra_deg,
                dec_deg,
                mag: magnitude(c.flux, config),
                flux: c.flux,
                num_blended_neighbors: c.num_blended_neighbors,
            }
        })
        .collect();

    if selected.is_empty() {
        return Err(no_sources());
    }
    log::info!("selected {} sources on {}", selected.len(), sensor);
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::label_blends;
    use ndarray::Array2;
    use shared::image_proc::simple_normal_array;
    use shared::image_proc::test_patterns::{annulus, place, PlaceMode};

    /// Tangent-plane stand-in: 0.2 arcsec per pixel around (10, -30) deg.
    struct LinearSky;

    impl PixelToSky for LinearSky {
        fn sky_from_pixel(&self, _sensor: &str, x: f64, y: f64) -> (f64, f64) {
            (10.0 + x * 0.2 / 3600.0, -30.0 + y * 0.2 / 3600.0)
        }
    }

    fn exposure() -> Image {
        let mut data = simple_normal_array((400, 400), 0.0, 10.0, 11).unwrap();
        let donut = annulus(60, 25.0, 15.0);
        // Near the edge, dropped by the margin
        place(&mut data, &(&donut * 300.0), 5, 5, PlaceMode::Add);
        place(&mut data, &(&donut * 100.0), 120, 150, PlaceMode::Add);
        place(&mut data, &(&donut * 200.0), 250, 220, PlaceMode::Add);
        Image::new(data).with_sensor("R00_S22")
    }

    fn config() -> SelectionConfig {
        let mut config = SelectionConfig {
            donut_img_size: 60,
            ..SelectionConfig::default()
        };
        config.detection.blend_radius = 80.0;
        config
    }

    #[test]
    fn test_select_ranks_and_drops_edge_sources() {
        let template = Image::new(annulus(60, 25.0, 15.0));
        let sources =
            select_sources(&exposure(), &template, &config(), CoordinateMode::Exposure, &LinearSky)
                .unwrap();
        assert_eq!(sources.len(), 2);
        // Brighter first
        assert!((sources[0].x_center - 250.0).abs() < 2.0);
        assert!((sources[0].y_center - 280.0).abs() < 2.0);
        assert!((sources[1].x_center - 180.0).abs() < 2.0);
        assert!(sources.iter().all(|s| s.mag == 15.0 && s.sensor == "R00_S22"));
        assert!((sources[0].ra_deg - (10.0 + sources[0].x_center * 0.2 / 3600.0)).abs() < 1e-12);
    }

    #[test]
    fn test_camera_mode_flips_rows() {
        let template = Image::new(annulus(60, 25.0, 15.0));
        let exposure_frame =
            select_sources(&exposure(), &template, &config(), CoordinateMode::Exposure, &LinearSky)
                .unwrap();
        let camera_frame =
            select_sources(&exposure(), &template, &config(), CoordinateMode::Camera, &LinearSky)
                .unwrap();
        for (e, c) in exposure_frame.iter().zip(&camera_frame) {
            assert_eq!(c.x_center, e.x_center);
            assert_eq!(c.y_center, 400.0 - e.y_center);
        }
    }

    #[test]
    fn test_max_sensor_stars_and_zero_point() {
        let template = Image::new(annulus(60, 25.0, 15.0));
        // The cap applies before the edge cut, so the bright edge donut
        // takes one of the two slots
        let config = SelectionConfig {
            max_sensor_stars: Some(2),
            magnitude_zero_point: Some(30.0),
            ..config()
        };
        let sources =
            select_sources(&exposure(), &template, &config, CoordinateMode::Exposure, &LinearSky)
                .unwrap();
        assert_eq!(sources.len(), 1);
        assert!((sources[0].x_center - 250.0).abs() < 2.0);
        let flux = sources[0].flux.unwrap();
        assert!((sources[0].mag - (30.0 - 2.5 * flux.log10())).abs() < 1e-12);
    }

    #[test]
    fn test_missing_sensor_and_empty_selection() {
        let template = Image::new(annulus(60, 25.0, 15.0));
        let anonymous = Image::new(exposure().into_data());
        assert_eq!(
            select_sources(&anonymous, &template, &config(), CoordinateMode::Exposure, &LinearSky),
            Err(SelectionError::MissingSensor)
        );

        // A margin wider than half the frame leaves nothing
        let config = SelectionConfig {
            donut_img_size: 250,
            ..config()
        };
        assert_eq!(
            select_sources(&exposure(), &template, &config, CoordinateMode::Exposure, &LinearSky),
            Err(SelectionError::NoSources {
                sensor: "R00_S22".to_string()
            })
        );
    }

    #[test]
    fn test_retry_stops_at_floor() {
        let detector = DonutDetector::new(Image::new(annulus(60, 25.0, 15.0)));
        let retry = RetryConfig {
            min_sources: 50,
            decay: 0.5,
            floor: 5.0,
        };
        match detect_with_minimum(&detector, &exposure(), 80.0, &retry) {
            Err(SelectionError::ThresholdFloorReached { required, floor, .. }) => {
                assert_eq!(required, 50);
                assert_eq!(floor, 5.0);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let retry = RetryConfig {
            min_sources: 1,
            ..RetryConfig::default()
        };
        let (candidates, _) = detect_with_minimum(&detector, &exposure(), 80.0, &retry).unwrap();
        assert!(!candidates.is_empty());

        let bad = RetryConfig {
            decay: 1.5,
            ..RetryConfig::default()
        };
        assert!(matches!(
            detect_with_minimum(&detector, &exposure(), 80.0, &bad),
            Err(SelectionError::Config(_))
        ));
    }

    #[test]
    fn test_retry_recovers_faint_donut() {
        let mut data = simple_normal_array((400, 400), 0.0, 5.0, 23).unwrap();
        let donut = annulus(60, 25.0, 15.0);
        place(&mut data, &(&donut * 2000.0), 100, 100, PlaceMode::Add);
        place(&mut data, &(&donut * 18.0), 240, 240, PlaceMode::Add);
        let exposure = Image::new(data).with_sensor("R00_S22");
        let detector = DonutDetector::new(Image::new(annulus(60, 25.0, 15.0)));

        // The estimated threshold sits above the faint donut
        let (first, t0) = detector.detect(&exposure, 80.0, None).unwrap();
        assert_eq!(first.len(), 1);
        assert!(t0 > 18.0, "threshold {t0}");

        let retry = RetryConfig {
            min_sources: 2,
            decay: 0.75,
            floor: 1.0,
        };
        let (found, threshold) = detect_with_minimum(&detector, &exposure, 80.0, &retry).unwrap();
        assert!(found.len() >= 2, "found {found:?}");
        let near = |x: f64, y: f64| {
            found
                .iter()
                .any(|c| (c.x_center - x).abs() < 6.0 && (c.y_center - y).abs() < 6.0)
        };
        assert!(near(130.0, 130.0));
        assert!(near(270.0, 270.0));

        // The threshold came from at least one decay step
        let mut expected = t0;
        let mut steps = 0;
        while expected > threshold * (1.0 + 1e-12) {
            expected *= 0.75;
            steps += 1;
        }
        assert!(steps >= 1);
        assert!((expected - threshold).abs() <= 1e-12 * t0);
    }

    #[test]
    fn test_select_sources_applies_retry() {
        let template = Image::new(annulus(60, 25.0, 15.0));
        let floor_config = SelectionConfig {
            retry: Some(RetryConfig {
                min_sources: 50,
                decay: 0.5,
                floor: 5.0,
            }),
            ..config()
        };
        assert!(matches!(
            select_sources(&exposure(), &template, &floor_config, CoordinateMode::Exposure, &LinearSky),
            Err(SelectionError::ThresholdFloorReached { required: 50, .. })
        ));

        // A count the first pass already meets changes nothing
        let met_config = SelectionConfig {
            retry: Some(RetryConfig {
                min_sources: 1,
                ..RetryConfig::default()
            }),
            ..config()
        };
        assert_eq!(
            select_sources(&exposure(), &template, &met_config, CoordinateMode::Exposure, &LinearSky),
            select_sources(&exposure(), &template, &config(), CoordinateMode::Exposure, &LinearSky)
        );
    }

    #[test]
    fn test_blend_magnitude_policy() {
        // 0 and 1 blended, 2 isolated
        let candidates = label_blends(&[(0.0, 0.0), (5.0, 0.0), (100.0, 0.0)], 10.0);
        let mags = [12.0, 14.5, 16.0];

        assert_eq!(filter_blends_by_magnitude(&candidates, &mags, 2.0).unwrap(), vec![2, 0]);
        assert_eq!(filter_blends_by_magnitude(&candidates, &mags, 3.0).unwrap(), vec![2]);
        assert_eq!(
            filter_blends_by_magnitude(&candidates, &mags[..2], 2.0),
            Err(SelectionError::LengthMismatch {
                candidates: 3,
                magnitudes: 2
            })
        );
    }

    #[test]
    fn test_deblending_keeps_single_neighbor_blends() {
        let mut data = Array2::zeros((400, 400));
        let donut = annulus(60, 25.0, 15.0);
        place(&mut data, &(&donut * 100.0), 150, 100, PlaceMode::Add);
        place(&mut data, &(&donut * 100.0), 150, 150, PlaceMode::Add);
        place(&mut data, &(&donut * 100.0), 150, 250, PlaceMode::Add);
        let noise = simple_normal_array((400, 400), 0.0, 5.0, 3).unwrap();
        let exposure = Image::new(data + noise).with_sensor("R04_S20");

        let config = SelectionConfig {
            do_deblending: true,
            ..config()
        };
        let template = Image::new(annulus(60, 25.0, 15.0));
        let sources =
            select_sources(&exposure, &template, &config, CoordinateMode::Exposure, &LinearSky)
                .unwrap();
        assert_eq!(sources.len(), 3);
        assert!(sources.iter().all(|s| s.flux.is_none()));
        assert_eq!(
            sources.iter().filter(|s| s.num_blended_neighbors == 1).count(),
            2
        );
    }
}
