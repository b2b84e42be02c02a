//! Configuration surfaces for detection, source selection and the wavefront
//! solver.
//!
//! `SolverOptions` is the raw, serializable option set a caller fills in
//! (from a file, a request, or code). Enumerated fields are kept as strings
//! so that unknown values reach [`SolverConfig::from_options`] and fail there
//! with a message naming the value and the valid set, instead of failing
//! inside a deserializer with a less useful message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shared::image_proc::detection::ThresholdMethod;
use thiserror::Error;

use crate::instrument::Instrument;

/// Configuration errors. Raised before any numerical work.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown instrument: {name}. Valid options: {valid}")]
    UnknownInstrument { name: String, valid: String },

    #[error("Unknown poisson solver: {value}. Valid options: {valid}")]
    UnknownPoissonSolver { value: String, valid: String },

    #[error("Unknown optical model: {value}. Valid options: {valid}")]
    UnknownOpticalModel { value: String, valid: String },

    #[error("Unknown template type: {value}. Valid options: {valid}")]
    UnknownTemplateKind { value: String, valid: String },

    #[error("Unknown deblend method: {value}. Valid options: {valid}")]
    UnknownDeblendMethod { value: String, valid: String },

    #[error(
        "image size {size} px is too small for {instrument}: a donut of radius {radius:.1} px needs at least {required} px"
    )]
    ImageTooSmall {
        instrument: String,
        size: usize,
        radius: f64,
        required: usize,
    },

    #[error("invalid {field}: {value} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Poisson solver used for each wavefront update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoissonSolver {
    /// Zernike series expansion of the TIE (Green's identity normal equations)
    SeriesExpansion,
    /// FFT Poisson solve followed by a Zernike fit
    Fft,
}

impl PoissonSolver {
    pub const VALID: &'static str = "seriesExpansion, exp, fft";
}

impl FromStr for PoissonSolver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "seriesexpansion" | "exp" => Ok(PoissonSolver::SeriesExpansion),
            "fft" => Ok(PoissonSolver::Fft),
            _ => Err(ConfigError::UnknownPoissonSolver {
                value: s.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

impl fmt::Display for PoissonSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoissonSolver::SeriesExpansion => f.write_str("seriesExpansion"),
            PoissonSolver::Fft => f.write_str("fft"),
        }
    }
}

/// Geometric model mapping pupil points to defocused image points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpticalModel {
    /// Linear pupil-to-image mapping
    Paraxial,
    /// Fast-beam radial mapping, centred obscuration
    OnAxis,
    /// Fast-beam radial mapping with the obscuration decentred by field angle
    OffAxis,
}

impl OpticalModel {
    pub const VALID: &'static str = "paraxial, onAxis, offAxis";
}

impl FromStr for OpticalModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paraxial" => Ok(OpticalModel::Paraxial),
            "onaxis" => Ok(OpticalModel::OnAxis),
            "offaxis" => Ok(OpticalModel::OffAxis),
            _ => Err(ConfigError::UnknownOpticalModel {
                value: s.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

impl fmt::Display for OpticalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpticalModel::Paraxial => f.write_str("paraxial"),
            OpticalModel::OnAxis => f.write_str("onAxis"),
            OpticalModel::OffAxis => f.write_str("offAxis"),
        }
    }
}

/// Raw wavefront solver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverOptions {
    /// "seriesExpansion" (alias "exp") or "fft"
    pub poisson_solver: String,
    /// "paraxial", "onAxis" or "offAxis"
    pub optical_model: String,
    /// Instrument family ("lsst", "comcam") or full name ("lsst15")
    pub instrument_name: String,
    /// Defocal distance in mm; appended to the instrument name when given
    pub defocal_distance_mm: Option<f64>,
    /// Side length of the square donut images in pixels
    pub image_size_pixels: usize,
    /// 0 quiet, 1 per-iteration debug logging
    pub verbosity: u8,
    /// Iteration cap for `solve`
    pub max_iterations: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            poisson_solver: "seriesExpansion".to_string(),
            optical_model: "offAxis".to_string(),
            instrument_name: "lsst".to_string(),
            defocal_distance_mm: Some(1.5),
            image_size_pixels: 160,
            verbosity: 0,
            max_iterations: 30,
        }
    }
}

/// Validated solver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub poisson_solver: PoissonSolver,
    pub optical_model: OpticalModel,
    pub instrument: Instrument,
    pub image_size: usize,
    pub verbosity: u8,
    pub max_iterations: usize,
}

/// Pixels of margin required around the nominal donut for aberrated edges.
const DONUT_MARGIN_PIXELS: f64 = 4.0;

impl SolverConfig {
    /// Validate raw options. Every enumerated value and the image size are
    /// checked here.
    pub fn from_options(options: &SolverOptions) -> Result<Self, ConfigError> {
        let poisson_solver: PoissonSolver = options.poisson_solver.parse()?;
        let optical_model: OpticalModel = options.optical_model.parse()?;
        let instrument =
            Instrument::resolve(&options.instrument_name, options.defocal_distance_mm)?;

        if options.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxIterations",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }

        let radius = instrument.donut_radius_pixels(optical_model);
        let required = (2.0 * (radius + DONUT_MARGIN_PIXELS)).ceil() as usize;
        if options.image_size_pixels < required {
            return Err(ConfigError::ImageTooSmall {
                instrument: instrument.name.clone(),
                size: options.image_size_pixels,
                radius,
                required,
            });
        }

        Ok(Self {
            poisson_solver,
            optical_model,
            instrument,
            image_size: options.image_size_pixels,
            verbosity: options.verbosity,
            max_iterations: options.max_iterations,
        })
    }
}

/// Donut detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Centres closer than this (pixels) are blended
    pub blend_radius: f64,
    /// Estimator for the exposure threshold
    pub image_threshold_method: ThresholdMethod,
    /// Estimator for the template threshold
    pub template_threshold_method: ThresholdMethod,
    /// Keep correlation pixels strictly above this fraction of the maximum
    pub peak_fraction: f64,
    /// DBSCAN neighbourhood radius in pixels
    pub cluster_eps: f64,
    /// DBSCAN core point size
    pub cluster_min_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blend_radius: 160.0,
            image_threshold_method: ThresholdMethod::Triangle,
            template_threshold_method: ThresholdMethod::Otsu,
            peak_fraction: 0.5,
            cluster_eps: 2.0,
            cluster_min_samples: 1,
        }
    }
}

/// Per-sensor source selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub detection: DetectionConfig,
    /// Keep blended sources with at most one neighbour instead of ranking
    /// unblended sources by flux
    pub do_deblending: bool,
    /// Keep at most this many sources per sensor
    pub max_sensor_stars: Option<usize>,
    /// Side length of a donut stamp; sources closer to the edge are dropped
    pub donut_img_size: usize,
    /// Magnitude reported when no flux zero point is configured
    pub default_magnitude: f64,
    /// Zero point converting correlation flux to magnitude
    pub magnitude_zero_point: Option<f64>,
    /// Lower the detection threshold until enough candidates are found
    pub retry: Option<RetryConfig>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            do_deblending: false,
            max_sensor_stars: None,
            donut_img_size: 160,
            default_magnitude: 15.0,
            magnitude_zero_point: None,
            retry: None,
        }
    }
}

/// Caller-level detection retry with a decaying threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Required number of candidates
    pub min_sources: usize,
    /// Multiplier applied to the threshold after each failed attempt
    pub decay: f64,
    /// Give up once the threshold falls below this value
    pub floor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_sources: 15,
            decay: 0.75,
            floor: 1e-3,
        }
    }
}
