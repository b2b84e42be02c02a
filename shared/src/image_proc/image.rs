//! The `Image` value type shared by every pipeline stage.
//!
//! An `Image` couples a 2D intensity array with an optional co-located
//! variance plane and the minimal metadata the pipeline needs: which side of
//! focus it was taken on, the sensor it came from and its pixel scale.
//!
//! # Coordinate System
//!
//! - **ndarray**: matrix indexing `[row, col]` = `[y, x]` with `(height, width)`
//! - **pipeline positions**: `x` is the column, `y` the row
//!
//! Images are never mutated after construction. Operations that derive a new
//! array (binarization, correlation) build a new `Image` through
//! [`Image::derive`], which carries the metadata across.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_size::PixelShape;

/// Errors from image construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error("variance plane shape {variance} does not match image shape {image}")]
    VarianceShape {
        image: PixelShape,
        variance: PixelShape,
    },
}

/// Side of focus an image was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefocalSide {
    Intra,
    Extra,
}

impl DefocalSide {
    /// Sign of the defocus: -1 intra-focal, +1 extra-focal.
    pub fn sign(&self) -> f64 {
        match self {
            DefocalSide::Intra => -1.0,
            DefocalSide::Extra => 1.0,
        }
    }

    /// Lower-case name used in template file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            DefocalSide::Intra => "intra",
            DefocalSide::Extra => "extra",
        }
    }
}

impl fmt::Display for DefocalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefocalSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "intra" => Ok(DefocalSide::Intra),
            "extra" => Ok(DefocalSide::Extra),
            _ => Err(format!(
                "Unknown defocal side: {s}. Valid options: intra, extra"
            )),
        }
    }
}

/// Intensity array plus optional variance plane and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array2<f64>,
    variance: Option<Array2<f64>>,
    side: Option<DefocalSide>,
    sensor: Option<String>,
    pixel_scale: Option<f64>,
}

impl Image {
    /// Wrap an intensity array with no variance plane or metadata.
    pub fn new(data: Array2<f64>) -> Self {
        Self {
            data,
            variance: None,
            side: None,
            sensor: None,
            pixel_scale: None,
        }
    }

    /// Attach a variance plane, which must match the image shape.
    pub fn with_variance(mut self, variance: Array2<f64>) -> Result<Self, ImageError> {
        if variance.dim() != self.data.dim() {
            return Err(ImageError::VarianceShape {
                image: PixelShape::from_dim(self.data.dim()),
                variance: PixelShape::from_dim(variance.dim()),
            });
        }
        self.variance = Some(variance);
        Ok(self)
    }

    pub fn with_side(mut self, side: DefocalSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_sensor(mut self, sensor: impl Into<String>) -> Self {
        self.sensor = Some(sensor.into());
        self
    }

    /// Pixel scale in arcsec per pixel.
    pub fn with_pixel_scale(mut self, arcsec_per_pixel: f64) -> Self {
        self.pixel_scale = Some(arcsec_per_pixel);
        self
    }

    /// New image with the same metadata and the given planes.
    ///
    /// A variance plane whose shape does not match `data` is dropped.
    pub fn derive(&self, data: Array2<f64>, variance: Option<Array2<f64>>) -> Self {
        let variance = variance.filter(|v| v.dim() == data.dim());
        Self {
            data,
            variance,
            side: self.side,
            sensor: self.sensor.clone(),
            pixel_scale: self.pixel_scale,
        }
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn variance(&self) -> Option<&Array2<f64>> {
        self.variance.as_ref()
    }

    pub fn side(&self) -> Option<DefocalSide> {
        self.side
    }

    pub fn sensor(&self) -> Option<&str> {
        self.sensor.as_deref()
    }

    pub fn pixel_scale(&self) -> Option<f64> {
        self.pixel_scale
    }

    pub fn shape(&self) -> PixelShape {
        PixelShape::from_dim(self.data.dim())
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Take ownership of the intensity array.
    pub fn into_data(self) -> Array2<f64> {
        self.data
    }
}

impl From<Array2<f64>> for Image {
    fn from(data: Array2<f64>) -> Self {
        Image::new(data)
    }
}
