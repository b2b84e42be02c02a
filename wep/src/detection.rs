//! Donut detection by template correlation.
//!
//! The exposure and the template are both binarized, the binary exposure is
//! cross-correlated with the binary template, and every correlation pixel
//! above a fraction of the global maximum is kept. The kept pixels form
//! compact blobs around each donut centre, which DBSCAN groups into clusters;
//! each cluster centroid is one candidate. Candidates are then blend-labeled.

use serde::{Deserialize, Serialize};
use shared::image_proc::{
    binarize, binarize_template, correlate_image, CorrelationError, Image, ThresholdError,
};
use thiserror::Error;
use wep_math::dbscan;

use crate::blend::{label_blends, DonutCandidate};
use crate::config::DetectionConfig;
use crate::flux::{self, FluxError};

/// Errors from donut detection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("binarization failed: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("correlation of the binary exposure with the template is empty")]
    NoSignal,

    #[error("blend radius must be non-negative, got {0}")]
    InvalidBlendRadius(f64),
}

/// Correlation peak kept for clustering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPeak {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// Template-correlation donut detector.
#[derive(Debug, Clone)]
pub struct DonutDetector {
    template: Image,
    config: DetectionConfig,
}

impl DonutDetector {
    pub fn new(template: Image) -> Self {
        Self::with_config(template, DetectionConfig::default())
    }

    pub fn with_config(template: Image, config: DetectionConfig) -> Self {
        Self { template, config }
    }

    pub fn template(&self) -> &Image {
        &self.template
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Binarize the exposure (estimating a threshold unless one is given)
    /// and the template.
    ///
    /// Returns the binary exposure, the binary template and the exposure
    /// threshold that was applied.
    pub fn binarize_inputs(
        &self,
        exposure: &Image,
        threshold: Option<f64>,
    ) -> Result<(Image, Image, f64), DetectionError> {
        let (binary_exposure, threshold) =
            binarize(exposure, threshold, &self.config.image_threshold_method)?;
        let (binary_template, _) =
            binarize_template(&self.template, &self.config.template_threshold_method)?;
        Ok((binary_exposure, binary_template, threshold))
    }

    /// Correlation pixels strictly above `peak_fraction` of the maximum,
    /// strongest first. Equal values keep row-major order.
    pub fn correlation_peaks(
        &self,
        exposure: &Image,
        threshold: Option<f64>,
    ) -> Result<(Vec<CorrelationPeak>, f64), DetectionError> {
        let (binary_exposure, binary_template, threshold) =
            self.binarize_inputs(exposure, threshold)?;
        let correlated = correlate_image(&binary_exposure, &binary_template)?;

        let max = correlated
            .data()
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if max <= 0.0 {
            return Err(DetectionError::NoSignal);
        }

        let cut = self.config.peak_fraction * max;
        let mut peaks: Vec<CorrelationPeak> = correlated
            .data()
            .indexed_iter()
            .filter(|(_, &value)| value > cut)
            .map(|((row, col), &value)| CorrelationPeak { row, col, value })
            .collect();
        peaks.sort_by(|a, b| b.value.total_cmp(&a.value));

        Ok((peaks, threshold))
    }

    /// Detect donuts in `exposure`.
    ///
    /// # Arguments
    /// * `exposure` - Image to search
    /// * `blend_radius` - Candidates closer than this (pixels) are blended
    /// * `threshold` - Binarization threshold; estimated when `None`
    ///
    /// # Returns
    /// Blend-labeled candidates and the threshold that was applied.
    pub fn detect(
        &self,
        exposure: &Image,
        blend_radius: f64,
        threshold: Option<f64>,
    ) -> Result<(Vec<DonutCandidate>, f64), DetectionError> {
        if blend_radius.is_nan() || blend_radius < 0.0 {
            return Err(DetectionError::InvalidBlendRadius(blend_radius));
        }

        let start = std::time::Instant::now();
        let (peaks, threshold) = self.correlation_peaks(exposure, threshold)?;

        let points: Vec<(f64, f64)> = peaks
            .iter()
            .map(|p| (p.col as f64, p.row as f64))
            .collect();
        let clusters = dbscan(
            &points,
            self.config.cluster_eps,
            self.config.cluster_min_samples,
        );
        let centers = clusters.centroids(&points);
        let candidates = label_blends(&centers, blend_radius);

        log::debug!(
            "detected {} donuts from {} correlation peaks in {:.1} ms (threshold {:.3})",
            candidates.len(),
            peaks.len(),
            start.elapsed().as_secs_f64() * 1000.0,
            threshold
        );

        Ok((candidates, threshold))
    }

    /// Rank unblended candidates by flux against this detector's template.
    pub fn rank_by_flux(
        &self,
        candidates: &[DonutCandidate],
        exposure: &Image,
    ) -> Result<Vec<DonutCandidate>, FluxError> {
        flux::rank_by_flux(candidates, exposure, &self.template)
    }
}
