//! Single-neighbour deblending of overlapping donuts.
//!
//! Given a stamp holding a bright donut and one known neighbour, a deblender
//! locates both centres, reports the integer offset from the main donut to
//! the neighbour, and reconstructs an approximate binary footprint of the
//! neighbour that a caller can use to mask or re-register flux.
//!
//! Two strategies implement [`DeblendStrategy`]:
//!
//! - [`TemplateConvolution`]: correlate the binary stamp with a binary
//!   donut template and pick peaks by non-maximum suppression
//! - [`Adaptive`]: template-free, reads the neighbour offset off the binary
//!   stamp's autocorrelation
//!
//! [`create_deblender`] builds a [`DeblendEngine`] for a configured
//! [`DeblendMethod`], pairing the strategy with a [`TemplateProvider`].
//!
//! Only one neighbour per call is supported. Separating more would need an
//! assignment between detected peaks and neighbour guesses.

pub mod adaptive;
pub mod convolve;

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::image_proc::{
    binarize_template, binary_centroid, binary_closing, BinaryShape, CorrelationError, DefocalSide,
    Image, Otsu, ThresholdError,
};
use shared::image_size::PixelShape;
use thiserror::Error;

use crate::config::ConfigError;
use crate::template::{TemplateError, TemplateProvider};

pub use adaptive::Adaptive;
pub use convolve::TemplateConvolution;

#[derive(Error, Debug)]
pub enum DeblendError {
    #[error("only one neighbouring donut can be deblended, got {count}")]
    UnsupportedNeighborCount { count: usize },

    #[error("a sensor name is required to look up the deblending template")]
    MissingSensor,

    #[error("template {template} is larger than the {image} image")]
    TemplateTooLarge { template: PixelShape, image: PixelShape },

    #[error("expected {expected} donut peaks, found {found}")]
    PeakCount { expected: usize, found: usize },

    #[error("binarized template is empty")]
    EmptyTemplate,

    #[error("binarized image is empty")]
    EmptyImage,

    #[error("binarization failed: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Deblending algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeblendMethod {
    TemplateConvolution,
    Adaptive,
}

impl DeblendMethod {
    const VALID: &'static str = "convolveTemplate, adapt";
}

impl fmt::Display for DeblendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeblendMethod::TemplateConvolution => write!(f, "convolveTemplate"),
            DeblendMethod::Adaptive => write!(f, "adapt"),
        }
    }
}

impl FromStr for DeblendMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convolvetemplate" | "templateconvolution" | "convolve" => {
                Ok(DeblendMethod::TemplateConvolution)
            }
            "adapt" | "adaptive" => Ok(DeblendMethod::Adaptive),
            _ => Err(ConfigError::UnknownDeblendMethod {
                value: s.to_string(),
                valid: Self::VALID.to_string(),
            }),
        }
    }
}

/// Outcome of deblending one donut pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DeblendResult {
    /// Approximate binary footprint of the neighbour
    pub neighbor_footprint: Array2<f64>,
    /// The binarized input stamp
    pub binary_image: Array2<f64>,
    /// Neighbour minus main centre, columns, truncated toward zero
    pub offset_x: isize,
    /// Neighbour minus main centre, rows, truncated toward zero
    pub offset_y: isize,
    /// (x, y) of the main donut
    pub main_center: (f64, f64),
    /// (x, y) of the neighbour
    pub neighbor_center: (f64, f64),
}

/// A binarized, closed donut template with its centroid and size.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTemplate {
    pub mask: Array2<f64>,
    pub shape: BinaryShape,
}

impl BinaryTemplate {
    /// Otsu-binarize and close `template`. The template must fit inside an
    /// `image`-sized stamp.
    pub fn from_template(template: &Image, image: PixelShape) -> Result<Self, DeblendError> {
        let shape = template.shape();
        if shape.width > image.width || shape.height > image.height {
            return Err(DeblendError::TemplateTooLarge {
                template: shape,
                image,
            });
        }

        let (binary, _) = binarize_template(template, &Otsu)?;
        let mask = binary_closing(&binary.view());
        let shape = binary_centroid(&mask.view()).ok_or(DeblendError::EmptyTemplate)?;
        Ok(Self { mask, shape })
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// One way of separating a donut from its neighbour.
pub trait DeblendStrategy: fmt::Debug {
    fn method(&self) -> DeblendMethod;

    /// Whether [`deblend`](Self::deblend) uses the template.
    fn uses_template(&self) -> bool;

    /// Binary version of the stamp. Otsu without median suppression, since
    /// a stamp is mostly donut.
    fn binarize(&self, image: &Image) -> Result<Array2<f64>, DeblendError> {
        let (binary, _) = binarize_template(image, &Otsu)?;
        Ok(binary.into_data())
    }

    /// `(x, y)` of one peak per donut: `guesses.len() + 1` in total.
    fn detect_peaks(
        &self,
        binary_image: &Array2<f64>,
        template: Option<&BinaryTemplate>,
        guesses: &[(f64, f64)],
    ) -> Result<Vec<(f64, f64)>, DeblendError>;

    /// Split two peaks into `(main, neighbour)`: the peak nearest the
    /// neighbour guess is the neighbour.
    fn estimate_centroids(
        &self,
        peaks: &[(f64, f64)],
        guess: (f64, f64),
    ) -> Result<((f64, f64), (f64, f64)), DeblendError> {
        match peaks {
            [a, b] => {
                if distance(*a, guess) <= distance(*b, guess) {
                    Ok((*b, *a))
                } else {
                    Ok((*a, *b))
                }
            }
            _ => Err(DeblendError::PeakCount {
                expected: 2,
                found: peaks.len(),
            }),
        }
    }

    /// Approximate binary footprint of the neighbour.
    fn separate_flux(
        &self,
        binary_image: &Array2<f64>,
        template: Option<&BinaryTemplate>,
        main: (f64, f64),
        neighbor: (f64, f64),
    ) -> Result<Array2<f64>, DeblendError>;

    /// Deblend `image` given the position guesses of its neighbours.
    fn deblend(
        &self,
        image: &Image,
        guesses: &[(f64, f64)],
        template: &Image,
    ) -> Result<DeblendResult, DeblendError> {
        if guesses.len() != 1 {
            return Err(DeblendError::UnsupportedNeighborCount {
                count: guesses.len(),
            });
        }

        let template = if self.uses_template() {
            Some(BinaryTemplate::from_template(template, image.shape())?)
        } else {
            None
        };
        let binary_image = self.binarize(image)?;
        let peaks = self.detect_peaks(&binary_image, template.as_ref(), guesses)?;
        if peaks.len() != guesses.len() + 1 {
            return Err(DeblendError::PeakCount {
                expected: guesses.len() + 1,
                found: peaks.len(),
            });
        }

        let (main, neighbor) = self.estimate_centroids(&peaks, guesses[0])?;
        let neighbor_footprint =
            self.separate_flux(&binary_image, template.as_ref(), main, neighbor)?;

        let offset_x = (neighbor.0 - main.0) as isize;
        let offset_y = (neighbor.1 - main.1) as isize;
        log::debug!(
            "{} deblend: main ({:.1}, {:.1}), neighbour ({:.1}, {:.1}), offset ({offset_x}, {offset_y})",
            self.method(),
            main.0,
            main.1,
            neighbor.0,
            neighbor.1
        );

        Ok(DeblendResult {
            neighbor_footprint,
            binary_image,
            offset_x,
            offset_y,
            main_center: main,
            neighbor_center: neighbor,
        })
    }
}

/// A deblending strategy bound to a template source.
#[derive(Debug)]
pub struct DeblendEngine {
    strategy: Box<dyn DeblendStrategy + Send + Sync>,
    provider: TemplateProvider,
}

/// Build the deblender for `method`.
pub fn create_deblender(method: DeblendMethod, provider: TemplateProvider) -> DeblendEngine {
    let strategy: Box<dyn DeblendStrategy + Send + Sync> = match method {
        DeblendMethod::TemplateConvolution => Box::new(TemplateConvolution::default()),
        DeblendMethod::Adaptive => Box::new(Adaptive),
    };
    DeblendEngine { strategy, provider }
}

impl DeblendEngine {
    pub fn method(&self) -> DeblendMethod {
        self.strategy.method()
    }

    pub fn provider(&self) -> &TemplateProvider {
        &self.provider
    }

    /// Deblend with an explicit template.
    pub fn deblend(
        &self,
        image: &Image,
        guesses: &[(f64, f64)],
        template: &Image,
    ) -> Result<DeblendResult, DeblendError> {
        self.strategy.deblend(image, guesses, template)
    }

    /// Deblend with the provider's template for `sensor`.
    ///
    /// A sensor name is always required, even by strategies that ignore the
    /// template.
    pub fn deblend_sensor(
        &self,
        image: &Image,
        guesses: &[(f64, f64)],
        sensor: Option<&str>,
        side: DefocalSide,
        pixel_scale: f64,
    ) -> Result<DeblendResult, DeblendError> {
        let sensor = sensor.ok_or(DeblendError::MissingSensor)?;
        if guesses.len() != 1 {
            return Err(DeblendError::UnsupportedNeighborCount {
                count: guesses.len(),
            });
        }
        let template = self.provider.template(sensor, side, pixel_scale)?;
        self.deblend(image, guesses, &template)
    }
}
