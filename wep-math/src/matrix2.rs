//! 2x2 matrix utilities using nalgebra
//!
//! Ray-map Jacobians are 2x2, so inversion is done in closed form with an
//! explicit singularity error instead of a general solver.

use nalgebra::Matrix2;
use thiserror::Error;

/// Error when matrix inversion fails due to singular matrix
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular matrix: determinant={determinant:.6e}")]
pub struct SingularMatrixError {
    /// The determinant value (zero or near-zero)
    pub determinant: f64,
}

/// Threshold for considering a determinant as zero
const DETERMINANT_EPSILON: f64 = 1e-12;

/// Invert a 2x2 matrix with error handling for singular matrices
///
/// # Arguments
/// * `matrix` - The 2x2 matrix to invert
///
/// # Returns
/// * `Ok(Matrix2<f64>)` - The inverse matrix
/// * `Err(SingularMatrixError)` - If matrix is singular
pub fn invert_matrix(matrix: &Matrix2<f64>) -> Result<Matrix2<f64>, SingularMatrixError> {
    let det = matrix.determinant();

    if det.abs() < DETERMINANT_EPSILON || !det.is_finite() {
        return Err(SingularMatrixError { determinant: det });
    }

    Ok(Matrix2::new(
        matrix[(1, 1)] / det,
        -matrix[(0, 1)] / det,
        -matrix[(1, 0)] / det,
        matrix[(0, 0)] / det,
    ))
}
