//! Telescope and camera geometry for the supported wavefront sensors.
//!
//! Every supported instrument shares the same telescope: an 8.36 m aperture
//! with a 61% central obscuration feeding a fast f/1.23 beam onto 10 µm
//! pixels. Instruments differ only in how far the sensor sits from focus.
//!
//! Names follow the `{family}{offset}` convention, where the offset is ten
//! times the defocal distance in millimetres (`lsst15` is 1.5 mm). The bare
//! `lsst` name is the nominal 1.5 mm corner sensor configuration.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, OpticalModel};

/// Aperture radius in metres.
pub const APERTURE_RADIUS_M: f64 = 4.18;

/// Fractional radius of the central obscuration.
pub const OBSCURATION: f64 = 0.61;

/// Effective focal length in metres.
pub const FOCAL_LENGTH_M: f64 = 10.312;

/// Detector pixel pitch in metres.
pub const PIXEL_SIZE_M: f64 = 10.0e-6;

/// Decentre of the obscuration in normalized pupil units per degree of field
/// angle, used by the off-axis model.
pub const OBSCURATION_SHIFT_PER_DEG: f64 = 0.05;

/// Supported instrument names and their defocal distances in millimetres.
const INSTRUMENTS: &[(&str, f64)] = &[
    ("lsst", 1.5),
    ("lsst05", 0.5),
    ("lsst10", 1.0),
    ("lsst15", 1.5),
    ("lsst20", 2.0),
    ("lsst25", 2.5),
    ("comcam10", 1.0),
    ("comcam15", 1.5),
    ("comcam20", 2.0),
];

const ARCSEC_TO_RAD: f64 = std::f64::consts::PI / (180.0 * 3600.0);

/// Optical parameters of one instrument configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    pub aperture_radius_m: f64,
    pub obscuration: f64,
    pub focal_length_m: f64,
    pub defocal_offset_m: f64,
    pub pixel_size_m: f64,
    pub obscuration_shift_per_deg: f64,
}

impl Instrument {
    /// Comma separated list of supported names.
    pub fn valid_names() -> String {
        INSTRUMENTS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Look up an instrument by its full name.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let lower = name.to_lowercase();
        let (found, offset_mm) = INSTRUMENTS
            .iter()
            .find(|(candidate, _)| *candidate == lower)
            .ok_or_else(|| ConfigError::UnknownInstrument {
                name: name.to_string(),
                valid: Self::valid_names(),
            })?;

        Ok(Self {
            name: found.to_string(),
            aperture_radius_m: APERTURE_RADIUS_M,
            obscuration: OBSCURATION,
            focal_length_m: FOCAL_LENGTH_M,
            defocal_offset_m: offset_mm * 1e-3,
            pixel_size_m: PIXEL_SIZE_M,
            obscuration_shift_per_deg: OBSCURATION_SHIFT_PER_DEG,
        })
    }

    /// Resolve a family name plus optional defocal distance.
    ///
    /// With a distance the lookup name is `{family}{10 * mm:02}`, so
    /// `("comcam", Some(1.0))` resolves to `comcam10`.
    pub fn resolve(family: &str, defocal_distance_mm: Option<f64>) -> Result<Self, ConfigError> {
        match defocal_distance_mm {
            None => Self::from_name(family),
            Some(mm) if !mm.is_finite() || mm <= 0.0 => Err(ConfigError::InvalidValue {
                field: "defocalDistanceMm",
                value: mm.to_string(),
                reason: "must be a positive distance",
            }),
            Some(mm) => {
                let tenths = (mm * 10.0).round() as u32;
                Self::from_name(&format!("{family}{tenths:02}"))
            }
        }
    }

    /// Same instrument with the pixel size implied by a plate scale.
    pub fn with_pixel_scale(mut self, arcsec_per_pixel: f64) -> Self {
        self.pixel_size_m = arcsec_per_pixel * ARCSEC_TO_RAD * self.focal_length_m;
        self
    }

    /// Marginal ray slope `R / f`.
    pub fn beta(&self) -> f64 {
        self.aperture_radius_m / self.focal_length_m
    }

    /// Radius of the defocused pupil image in metres.
    ///
    /// Paraxial optics give `Δ R / f`. The fast-beam models use the true
    /// marginal ray angle, `Δ tan θ` with `sin θ = R / f`.
    pub fn donut_radius_m(&self, model: OpticalModel) -> f64 {
        let beta = self.beta();
        match model {
            OpticalModel::Paraxial => self.defocal_offset_m * beta,
            OpticalModel::OnAxis | OpticalModel::OffAxis => {
                self.defocal_offset_m * beta / (1.0 - beta * beta).sqrt()
            }
        }
    }

    /// Radius of the defocused pupil image in pixels.
    pub fn donut_radius_pixels(&self, model: OpticalModel) -> f64 {
        self.donut_radius_m(model) / self.pixel_size_m
    }

    /// Image displacement, in donut radii, per metre of normalized wavefront
    /// slope: `f / (R r_d)`.
    pub fn ray_scale(&self, model: OpticalModel) -> f64 {
        self.focal_length_m / (self.aperture_radius_m * self.donut_radius_m(model))
    }
}
