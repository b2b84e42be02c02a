//! wep-math - Numeric building blocks for wavefront estimation
//!
//! This crate collects the small, dependency-light algorithms that the
//! image-processing and wavefront crates build on:
//!
//! - **Statistics** - NaN-aware median
//! - **DBSCAN** - density clustering of correlation peaks
//! - **Zernike** - Noll-indexed Zernike polynomials with exact first and
//!   second derivatives
//! - **Matrix** - 2x2 inversion with singularity reporting
//! - **Locatable2d** - trait for anything with an (x, y) position
//!
//! # Example
//!
//! ```text
//! use wep_math::zernike::ZernikeBasis;
//!
//! let basis = ZernikeBasis::new(22)?;
//! let defocus = basis.term(4)?.evaluate(0.5, 0.0);
//! ```

pub mod dbscan;
pub mod locate;
pub mod matrix2;
pub mod stats;
pub mod zernike;

// Re-export commonly used types
pub use dbscan::{dbscan, DbscanResult};
pub use locate::Locatable2d;
pub use matrix2::{invert_matrix, SingularMatrixError};
pub use stats::median;
pub use zernike::{ZernikeBasis, ZernikeDerivatives, ZernikeError, ZernikePolynomial};
