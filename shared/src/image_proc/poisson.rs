//! FFT Poisson solver on a zero-padded periodic grid.
//!
//! Solves `∇²φ = f` for the five-point discrete Laplacian with unit pixel
//! spacing. The source is zero-padded to a 5-smooth size of at least twice
//! its extent so the periodic images of a compact source barely interact.
//! The constant mode is undetermined and set to zero.

use ndarray::{Array2, ArrayView2};
use rustfft::{num_complex::Complex64, FftPlanner};
use thiserror::Error;

use crate::image_proc::correlate::{fft2, next_fast_len};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoissonError {
    #[error("poisson source is empty")]
    EmptySource,
}

/// Eigenvalues below this are treated as the null (constant) mode.
const NULL_MODE_EPSILON: f64 = 1e-12;

/// Solve `∇²φ = source` and return `φ` over the source extent.
pub fn solve_poisson(source: &ArrayView2<f64>) -> Result<Array2<f64>, PoissonError> {
    if source.is_empty() {
        return Err(PoissonError::EmptySource);
    }

    let (rows, cols) = source.dim();
    let (pr, pc) = (next_fast_len(2 * rows), next_fast_len(2 * cols));
    let mut planner = FftPlanner::new();

    let mut spectrum = Array2::from_elem((pr, pc), Complex64::new(0.0, 0.0));
    for ((r, c), &v) in source.indexed_iter() {
        spectrum[[r, c]] = Complex64::new(v, 0.0);
    }
    fft2(&mut spectrum, &mut planner, false);

    let tau = 2.0 * std::f64::consts::PI;
    for ((kr, kc), value) in spectrum.indexed_iter_mut() {
        let eigen = 2.0 * (tau * kr as f64 / pr as f64).cos()
            + 2.0 * (tau * kc as f64 / pc as f64).cos()
            - 4.0;
        if eigen.abs() < NULL_MODE_EPSILON {
            *value = Complex64::new(0.0, 0.0);
        } else {
            *value /= eigen;
        }
    }
    fft2(&mut spectrum, &mut planner, true);

    let scale = 1.0 / (pr * pc) as f64;
    Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
        spectrum[[r, c]].re * scale
    }))
}
