//! Donut templates for correlation detection and deblending.
//!
//! Three kinds of template are supported:
//!
//! - **Reference**: simulated donut stamps on disk,
//!   `{dir}/{side}_template-{sensor}.txt`. Values below 50 are treated as
//!   background and zeroed.
//! - **IsolatedDonut**: stamps cut from real exposures,
//!   `{dir}/isolatedDonutTemplate/{side}_template-{sensor}.dat`. Negative
//!   values are zeroed.
//! - **Model**: the binary footprint of an unaberrated donut rendered by the
//!   optical model, at the sensor's field position and the requested pixel
//!   scale.
//!
//! Templates are built on every request; nothing is cached.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::image_proc::{read_text_array, DefocalSide, Image, TextArrayError};
use thiserror::Error;

use crate::config::{ConfigError, OpticalModel};
use crate::instrument::Instrument;
use crate::tie::optics::PupilGeometry;

/// Values below this are background in reference templates.
const REFERENCE_NOISE_FLOOR: f64 = 50.0;

/// Values below this are background in isolated donut templates.
const ISOLATED_NOISE_FLOOR: f64 = 0.0;

const ISOLATED_SUBDIR: &str = "isolatedDonutTemplate";

/// Errors from building a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{kind} templates need a template directory")]
    MissingDirectory { kind: TemplateKind },

    #[error("failed to load {kind} template: {source}")]
    Load {
        kind: TemplateKind,
        #[source]
        source: TextArrayError,
    },

    #[error("pixel scale must be positive and finite, got {0}")]
    InvalidPixelScale(f64),

    #[error("model template of {size} px cannot hold a donut of radius {radius:.1} px")]
    DonutTooLarge { size: usize, radius: f64 },
}

/// Source of donut templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateKind {
    Reference,
    Model,
    IsolatedDonut,
}

impl TemplateKind {
    const VALID: &'static str = "phosim, reference, model, isolatedDonutFromImage, isolated";
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateKind::Reference => "reference",
            TemplateKind::Model => "model",
            TemplateKind::IsolatedDonut => "isolatedDonutFromImage",
        };
        write!(f, "{name}")
    }
}

impl FromStr for TemplateKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "phosim" | "reference" => Ok(TemplateKind::Reference),
            "model" => Ok(TemplateKind::Model),
            "isolateddonutfromimage" | "isolated" => Ok(TemplateKind::IsolatedDonut),
            _ => Err(ConfigError::UnknownTemplateKind {
                value: s.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

/// Builds templates for a (sensor, side, pixel scale) combination.
#[derive(Debug, Clone)]
pub struct TemplateProvider {
    kind: TemplateKind,
    template_dir: Option<PathBuf>,
    instrument: Instrument,
    optical_model: OpticalModel,
    size: usize,
    field_positions: HashMap<String, (f64, f64)>,
}

impl TemplateProvider {
    /// Provider of `size`-pixel model templates.
    pub fn model(instrument: Instrument, size: usize) -> Self {
        Self {
            kind: TemplateKind::Model,
            template_dir: None,
            instrument,
            optical_model: OpticalModel::OffAxis,
            size,
            field_positions: HashMap::new(),
        }
    }

    /// Provider of templates read from `template_dir`.
    pub fn from_directory(
        kind: TemplateKind,
        template_dir: impl Into<PathBuf>,
        instrument: Instrument,
        size: usize,
    ) -> Self {
        Self {
            kind,
            template_dir: Some(template_dir.into()),
            ..Self::model(instrument, size)
        }
    }

    pub fn with_optical_model(mut self, model: OpticalModel) -> Self {
        self.optical_model = model;
        self
    }

    /// Field angle (degrees) of a sensor centre, used by model templates.
    /// Unlisted sensors sit on axis.
    pub fn with_field_position(mut self, sensor: impl Into<String>, field_deg: (f64, f64)) -> Self {
        self.field_positions.insert(sensor.into(), field_deg);
        self
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Path of the file backing a file template, if this kind has one.
    pub fn template_path(&self, sensor: &str, side: DefocalSide) -> Option<PathBuf> {
        let dir = self.template_dir.as_deref()?;
        match self.kind {
            TemplateKind::Reference => Some(dir.join(format!("{side}_template-{sensor}.txt"))),
            TemplateKind::IsolatedDonut => Some(
                dir.join(ISOLATED_SUBDIR)
                    .join(format!("{side}_template-{sensor}.dat")),
            ),
            TemplateKind::Model => None,
        }
    }

    /// Build the template for `sensor` on `side` at `pixel_scale` arcsec/px.
    pub fn template(
        &self,
        sensor: &str,
        side: DefocalSide,
        pixel_scale: f64,
    ) -> Result<Image, TemplateError> {
        if !pixel_scale.is_finite() || pixel_scale <= 0.0 {
            return Err(TemplateError::InvalidPixelScale(pixel_scale));
        }

        let data = match self.kind {
            TemplateKind::Model => {
                let instrument = self.instrument.clone().with_pixel_scale(pixel_scale);
                let geometry = PupilGeometry::new(&instrument, self.optical_model, self.size);
                if 2.0 * geometry.radius_pixels() > self.size as f64 {
                    return Err(TemplateError::DonutTooLarge {
                        size: self.size,
                        radius: geometry.radius_pixels(),
                    });
                }
                let field = self
                    .field_positions
                    .get(sensor)
                    .copied()
                    .unwrap_or((0.0, 0.0));
                geometry.footprint(side, field)
            }
            TemplateKind::Reference => self.load(sensor, side, REFERENCE_NOISE_FLOOR)?,
            TemplateKind::IsolatedDonut => self.load(sensor, side, ISOLATED_NOISE_FLOOR)?,
        };

        log::debug!(
            "built {} template for {} {}-focal at {} arcsec/px ({}x{})",
            self.kind,
            sensor,
            side,
            pixel_scale,
            data.ncols(),
            data.nrows()
        );

        Ok(Image::new(data)
            .with_side(side)
            .with_sensor(sensor)
            .with_pixel_scale(pixel_scale))
    }

    fn load(
        &self,
        sensor: &str,
        side: DefocalSide,
        noise_floor: f64,
    ) -> Result<Array2<f64>, TemplateError> {
        let path = self
            .template_path(sensor, side)
            .ok_or(TemplateError::MissingDirectory { kind: self.kind })?;
        let mut data = read_text_array(&path).map_err(|source| TemplateError::Load {
            kind: self.kind,
            source,
        })?;
        data.mapv_inplace(|v| if v < noise_floor { 0.0 } else { v });
        Ok(data)
    }
}
