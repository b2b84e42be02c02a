//! Thresholding and binarization for donut detection.
//!
//! - **thresholding**: histogram threshold estimators (triangle, Otsu) behind
//!   the `ThresholdEstimator` trait, plus the exposure and template binarizers

pub mod thresholding;

pub use thresholding::{
    apply_threshold, binarize, binarize_template, Histogram, Otsu, ThresholdError,
    ThresholdEstimator, ThresholdMethod, Triangle,
};
