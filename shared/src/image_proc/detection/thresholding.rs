//! Histogram threshold estimation and binarization of donut images.
//!
//! This module converts floating-point exposures and donut templates into
//! 0/1 masks for template correlation.
//!
//! # Key Algorithms
//!
//! ## Histogram
//! Both estimators work on a 256-bin histogram spanning the image's own
//! `[min, max]` range and return a bin centre. Because bin centres sit half a
//! bin inside the range, an estimated threshold always lies strictly between
//! the image minimum and maximum.
//!
//! ## Triangle Thresholding
//! Draws a line from the histogram peak to the far end of its longer tail
//! and picks the bin with the greatest distance below that line. Suited to
//! the unimodal histograms of sparse, sky-dominated exposures.
//!
//! ## Otsu Thresholding
//! Picks the split that maximizes between-class variance. Suited to bimodal
//! inputs such as noise-free templates.
//!
//! # Binarization
//!
//! [`binarize`] clips negative pixels to zero, thresholds (`<= t` to 0,
//! `> t` to 1) and then zeroes every pixel whose original value is below the
//! image median. In sparse fields the median cut removes noise peaks that the
//! threshold lets through. [`binarize_template`] skips the median cut.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wep_math::stats::median;

use crate::image_proc::image::Image;

/// Number of histogram bins used by the estimators.
pub const HISTOGRAM_BINS: usize = 256;

/// Errors from threshold estimation and binarization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("cannot estimate a threshold from a degenerate image: {0}")]
    Degenerate(String),

    #[error("threshold must be finite, got {0}")]
    InvalidThreshold(f64),
}

/// Histogram over the `[min, max]` range of an image.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Pixel count per bin
    pub counts: Vec<f64>,
    /// Centre value of each bin
    pub centers: Vec<f64>,
}

impl Histogram {
    /// Build an `nbins` histogram spanning the finite range of `image`.
    ///
    /// Fails when the image has no finite pixels or is constant.
    pub fn from_image(image: &ArrayView2<f64>, nbins: usize) -> Result<Self, ThresholdError> {
        let (min, max) = image
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        if !min.is_finite() {
            return Err(ThresholdError::Degenerate(
                "no finite pixel values".to_string(),
            ));
        }
        if max <= min {
            return Err(ThresholdError::Degenerate(format!(
                "all pixels equal {min}"
            )));
        }

        let width = (max - min) / nbins as f64;
        let mut counts = vec![0.0; nbins];
        for &v in image.iter().filter(|v| v.is_finite()) {
            let bin = (((v - min) / width) as usize).min(nbins - 1);
            counts[bin] += 1.0;
        }
        let centers = (0..nbins)
            .map(|i| min + width * (i as f64 + 0.5))
            .collect();

        Ok(Self { counts, centers })
    }
}

/// A pluggable automatic threshold estimator.
pub trait ThresholdEstimator: fmt::Debug {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Estimate a threshold from the histogram of `image`.
    fn estimate(&self, image: &ArrayView2<f64>) -> Result<f64, ThresholdError>;
}

/// Otsu's method: maximize between-class variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Otsu;

impl ThresholdEstimator for Otsu {
    fn name(&self) -> &'static str {
        "otsu"
    }

    fn estimate(&self, image: &ArrayView2<f64>) -> Result<f64, ThresholdError> {
        let hist = Histogram::from_image(image, HISTOGRAM_BINS)?;
        let n = hist.counts.len();

        // Class weights and means with the split after bin i (below) and
        // from bin i onward (above).
        let mut weight_below = vec![0.0; n];
        let mut mean_below = vec![0.0; n];
        let (mut w, mut s) = (0.0, 0.0);
        for i in 0..n {
            w += hist.counts[i];
            s += hist.counts[i] * hist.centers[i];
            weight_below[i] = w;
            mean_below[i] = if w > 0.0 { s / w } else { 0.0 };
        }

        let mut weight_above = vec![0.0; n];
        let mut mean_above = vec![0.0; n];
        let (mut w, mut s) = (0.0, 0.0);
        for i in (0..n).rev() {
            w += hist.counts[i];
            s += hist.counts[i] * hist.centers[i];
            weight_above[i] = w;
            mean_above[i] = if w > 0.0 { s / w } else { 0.0 };
        }

        let mut best = 0;
        let mut best_variance = f64::NEG_INFINITY;
        for i in 0..n - 1 {
            let variance = weight_below[i]
                * weight_above[i + 1]
                * (mean_below[i] - mean_above[i + 1]).powi(2);
            if variance > best_variance {
                best_variance = variance;
                best = i;
            }
        }

        Ok(hist.centers[best])
    }
}

/// Triangle method for unimodal histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct Triangle;

impl ThresholdEstimator for Triangle {
    fn name(&self) -> &'static str {
        "triangle"
    }

    fn estimate(&self, image: &ArrayView2<f64>) -> Result<f64, ThresholdError> {
        let hist = Histogram::from_image(image, HISTOGRAM_BINS)?;
        let nbins = hist.counts.len();

        let mut peak = 0;
        for i in 1..nbins {
            if hist.counts[i] > hist.counts[peak] {
                peak = i;
            }
        }
        let peak_height = hist.counts[peak];

        // The range spans [min, max], so the first and last bins are occupied
        let low = 0;
        let high = nbins - 1;

        // Work on the longer tail; mirror the histogram so it is on the left
        let flip = peak - low < high - peak;
        let counts: Vec<f64> = if flip {
            hist.counts.iter().rev().copied().collect()
        } else {
            hist.counts.clone()
        };
        let (low, peak) = if flip {
            (nbins - high - 1, nbins - peak - 1)
        } else {
            (low, peak)
        };

        let width = (peak - low) as f64;
        if width == 0.0 {
            let level = if flip { nbins - peak - 1 } else { peak };
            return Ok(hist.centers[level]);
        }

        let norm = (peak_height * peak_height + width * width).sqrt();
        let (h, w) = (peak_height / norm, width / norm);

        let mut best = 0;
        let mut best_length = f64::NEG_INFINITY;
        for x in 0..(peak - low) {
            let length = h * x as f64 - w * counts[x + low];
            if length > best_length {
                best_length = length;
                best = x;
            }
        }

        let mut level = best + low;
        if flip {
            level = nbins - level - 1;
        }
        Ok(hist.centers[level])
    }
}

/// Named estimator choice for configuration surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    #[default]
    Triangle,
    Otsu,
}

impl ThresholdEstimator for ThresholdMethod {
    fn name(&self) -> &'static str {
        match self {
            ThresholdMethod::Triangle => Triangle.name(),
            ThresholdMethod::Otsu => Otsu.name(),
        }
    }

    fn estimate(&self, image: &ArrayView2<f64>) -> Result<f64, ThresholdError> {
        match self {
            ThresholdMethod::Triangle => Triangle.estimate(image),
            ThresholdMethod::Otsu => Otsu.estimate(image),
        }
    }
}

impl FromStr for ThresholdMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "triangle" => Ok(ThresholdMethod::Triangle),
            "otsu" => Ok(ThresholdMethod::Otsu),
            _ => Err(format!(
                "Unknown threshold method: {s}. Valid options: triangle, otsu"
            )),
        }
    }
}

/// Apply a threshold to a clipped copy of `image`: `<= t` to 0, `> t` to 1.
///
/// Negative pixels are clipped to zero first, so a negative threshold marks
/// every clipped pixel as foreground.
pub fn apply_threshold(image: &ArrayView2<f64>, threshold: f64) -> Array2<f64> {
    image.mapv(|pixel| if pixel.max(0.0) > threshold { 1.0 } else { 0.0 })
}

/// Binarize an exposure.
///
/// # Arguments
/// * `image` - Exposure to binarize
/// * `threshold` - Use this threshold instead of estimating one
/// * `estimator` - Estimator used when `threshold` is `None`
///
/// # Returns
/// The binary image (same shape and metadata, no variance plane) and the
/// threshold that was applied.
pub fn binarize(
    image: &Image,
    threshold: Option<f64>,
    estimator: &dyn ThresholdEstimator,
) -> Result<(Image, f64), ThresholdError> {
    let data = image.view();
    let threshold = match threshold {
        Some(t) if !t.is_finite() => return Err(ThresholdError::InvalidThreshold(t)),
        Some(t) => t,
        None => estimator.estimate(&data)?,
    };

    let mut binary = apply_threshold(&data, threshold);

    let pixels: Vec<f64> = data.iter().copied().collect();
    let image_median = median(&pixels).map_err(ThresholdError::Degenerate)?;
    for (b, &v) in binary.iter_mut().zip(data.iter()) {
        if v < image_median {
            *b = 0.0;
        }
    }

    log::debug!(
        "binarized {} image at threshold {:.4} (median {:.4}), {} foreground pixels",
        image.shape(),
        threshold,
        image_median,
        binary.sum()
    );

    Ok((image.derive(binary, None), threshold))
}

/// Binarize a noise-free template: no median suppression.
pub fn binarize_template(
    template: &Image,
    estimator: &dyn ThresholdEstimator,
) -> Result<(Image, f64), ThresholdError> {
    let data = template.view();
    let threshold = estimator.estimate(&data)?;
    Ok((template.derive(apply_threshold(&data, threshold), None), threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::noise::simple_normal_array;
    use crate::image_proc::test_patterns::annulus;
    use ndarray::s;

    fn sparse_field() -> Image {
        let mut data = simple_normal_array((200, 200), 0.0, 10.0, 42).unwrap();
        let donut = annulus(60, 25.0, 15.0);
        let mut stamp = data.slice_mut(s![70..130, 70..130]);
        stamp.assign(&(&donut * 100.0));
        Image::new(data)
    }

    #[test]
    fn test_binarize_output_is_binary_and_same_shape() {
        let img = sparse_field();
        let (binary, threshold) = binarize(&img, None, &Triangle).unwrap();
        assert_eq!(binary.shape(), img.shape());
        assert!(binary.data().iter().all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(binary.data().iter().cloned().fold(f64::MIN, f64::max), 1.0);

        let min = img.data().iter().cloned().fold(f64::INFINITY, f64::min);
        let max = img.data().iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(min < threshold && threshold < max);
    }

    #[test]
    fn test_supplied_threshold_reproduces_estimate() {
        let img = sparse_field();
        let (first, threshold) = binarize(&img, None, &Triangle).unwrap();
        let (second, reused) = binarize(&img, Some(threshold), &Otsu).unwrap();
        assert_eq!(threshold, reused);
        assert_eq!(first.data(), second.data());
    }

    #[test]
    fn test_donut_pixels_survive_and_noise_is_suppressed() {
        let img = sparse_field();
        let (binary, _) = binarize(&img, None, &Triangle).unwrap();
        let donut = annulus(60, 25.0, 15.0);
        let stamp = binary.data().slice(s![70..130, 70..130]).to_owned();
        let donut_pixels = donut.sum();
        let recovered = (&stamp * &donut).sum();
        assert_eq!(recovered, donut_pixels);
        // Triangle on sky-dominated noise should keep a small fraction
        let total_noise = binary.data().sum() - recovered;
        assert!(total_noise < 0.1 * (200.0 * 200.0));
    }

    #[test]
    fn test_median_suppression() {
        // Eight pixels at 10, the rest near 0; median is 7
        let mut data = Array2::zeros((4, 4));
        data.slice_mut(s![0..2, ..]).fill(10.0);
        data[[3, 3]] = 4.0;
        let img = Image::new(data);
        let (binary, _) = binarize(&img, Some(1.0), &Triangle).unwrap();
        // 4.0 is above the threshold but below the median
        assert_eq!(binary.data()[[3, 3]], 0.0);
        assert_eq!(binary.data()[[0, 0]], 1.0);
    }

    #[test]
    fn test_template_otsu_on_binary_mask() {
        let template = Image::new(annulus(40, 15.0, 8.0) * 7.0);
        let (binary, threshold) = binarize_template(&template, &Otsu).unwrap();
        assert!(threshold > 0.0 && threshold < 7.0);
        assert_eq!(binary.data(), &annulus(40, 15.0, 8.0));
    }

    #[test]
    fn test_otsu_bimodal_split() {
        let mut data = Array2::from_elem((10, 10), 1.0);
        data.slice_mut(s![0..5, ..]).fill(9.0);
        let t = Otsu.estimate(&data.view()).unwrap();
        assert!(t > 1.0 && t < 9.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let flat = Image::new(Array2::from_elem((5, 5), 3.0));
        assert!(matches!(
            binarize(&flat, None, &Triangle),
            Err(ThresholdError::Degenerate(_))
        ));
        assert!(matches!(
            binarize(&flat, Some(f64::NAN), &Triangle),
            Err(ThresholdError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_threshold_method_from_str() {
        assert_eq!("Otsu".parse::<ThresholdMethod>(), Ok(ThresholdMethod::Otsu));
        let err = "mean".parse::<ThresholdMethod>().unwrap_err();
        assert_eq!(err, "Unknown threshold method: mean. Valid options: triangle, otsu");
    }
}
