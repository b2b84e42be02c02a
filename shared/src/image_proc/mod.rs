//! Image processing primitives for donut detection and wavefront sensing.
//!
//! # Module Organization
//!
//! - **image**: the `Image` value type (data, optional variance, metadata)
//! - **detection::thresholding**: pluggable histogram threshold estimators
//!   (triangle, Otsu) and the exposure/template binarizers
//! - **correlate**: FFT cross-correlation with `same`-size output
//! - **morphology**: binary dilation, erosion and closing
//! - **centroid**: centroid and characteristic radius of binary shapes,
//!   integer translation of arrays
//! - **io**: whitespace-delimited text arrays used for template files
//! - **poisson**: FFT Poisson solver used by the wavefront estimator
//! - **noise**: seeded Gaussian noise fields
//! - **test_patterns**: synthetic annuli and stamp placement for tests

pub mod centroid;
pub mod correlate;
pub mod detection;
pub mod image;
pub mod io;
pub mod morphology;
pub mod noise;
pub mod poisson;
pub mod test_patterns;

// Re-export key functionality for easier access
pub use centroid::{binary_centroid, translate, BinaryShape};
pub use correlate::{correlate, correlate_image, CorrelationError};
pub use detection::{
    binarize, binarize_template, Otsu, ThresholdError, ThresholdEstimator, ThresholdMethod,
    Triangle,
};
pub use image::{DefocalSide, Image, ImageError};
pub use io::{read_text_array, write_text_array, TextArrayError};
pub use morphology::{binary_closing, binary_dilation, binary_erosion};
pub use noise::simple_normal_array;
pub use poisson::{solve_poisson, PoissonError};
