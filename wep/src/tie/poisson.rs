//! Wavefront corrections from an intensity difference.
//!
//! To first order the normalized intensity difference of a mirrored
//! intra/extra pair is
//!
//! ```text
//! D = I_intra(-X) - I_extra(X) = 2k ∇·(A ∇W)
//! ```
//!
//! Two ways of inverting this for a correction to the Zernike coefficients
//! `z2..z22` are provided:
//!
//! - **series expansion**: project onto each Zernike term and integrate by
//!   parts, giving the normal equations `Σ_k G_jk a_k = -b_j / 2k` with
//!   `G_jk = Σ A ∇Z_j·∇Z_k` and `b_j = Σ Z_j D`
//! - **FFT**: solve `∇²W = D / 2k` with the periodic FFT Poisson solver and
//!   least-squares fit `Z_1..Z_22` inside the pupil
//!
//! Both are linear in `D`, so the matrices are factored once per image pair.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use shared::image_proc::solve_poisson;

use crate::config::PoissonSolver;
use crate::tie::optics::{ForwardModel, MAX_NOLL};
use crate::tie::SolverError;

/// First Noll index solved for; tilts are fitted as nuisance terms.
pub const FIRST_FITTED_NOLL: usize = 2;

/// Number of coefficients in a correction, `z2..=z22`.
pub const N_FITTED: usize = MAX_NOLL - FIRST_FITTED_NOLL + 1;

/// Weight above which a sample counts as inside the pupil for the FFT fit.
const PUPIL_WEIGHT: f64 = 0.5;

/// A prepared correction operator.
#[derive(Debug, Clone)]
pub enum CorrectionStep {
    SeriesExpansion {
        /// `G^{-1}` over `z2..z22`
        inverse_gram: DMatrix<f64>,
    },
    Fft {
        /// Samples used for the Zernike fit
        pupil: Vec<usize>,
        /// `(MᵀM)^{-1} Mᵀ` over `Z_1..Z_22`
        fit: DMatrix<f64>,
    },
}

impl CorrectionStep {
    /// Factor the operator for per-sample pupil `weights`.
    pub fn prepare(
        solver: PoissonSolver,
        model: &ForwardModel,
        weights: &[f64],
    ) -> Result<Self, SolverError> {
        match solver {
            PoissonSolver::SeriesExpansion => Self::prepare_series(model, weights),
            PoissonSolver::Fft => Self::prepare_fft(model, weights),
        }
    }

    fn prepare_series(model: &ForwardModel, weights: &[f64]) -> Result<Self, SolverError> {
        let mut gram = DMatrix::<f64>::zeros(N_FITTED, N_FITTED);
        for (index, &weight) in weights.iter().enumerate() {
            if weight <= 0.0 {
                continue;
            }
            for a in 0..N_FITTED {
                let za = model.term(index, a + FIRST_FITTED_NOLL);
                for b in a..N_FITTED {
                    let zb = model.term(index, b + FIRST_FITTED_NOLL);
                    gram[(a, b)] += weight * (za.dx * zb.dx + za.dy * zb.dy);
                }
            }
        }
        for a in 0..N_FITTED {
            for b in 0..a {
                gram[(a, b)] = gram[(b, a)];
            }
        }

        let inverse_gram = gram.try_inverse().ok_or(SolverError::SingularSystem {
            solver: PoissonSolver::SeriesExpansion,
        })?;
        Ok(CorrectionStep::SeriesExpansion { inverse_gram })
    }

    fn prepare_fft(model: &ForwardModel, weights: &[f64]) -> Result<Self, SolverError> {
        let pupil: Vec<usize> = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > PUPIL_WEIGHT)
            .map(|(index, _)| index)
            .collect();

        let design = DMatrix::from_fn(pupil.len(), MAX_NOLL, |row, col| {
            model.term(pupil[row], col + 1).value
        });
        let normal = design.transpose() * &design;
        let inverse = normal.try_inverse().ok_or(SolverError::SingularSystem {
            solver: PoissonSolver::Fft,
        })?;
        let fit = inverse * design.transpose();
        Ok(CorrectionStep::Fft { pupil, fit })
    }

    /// Coefficient correction (nm) for `z2..z22` from the per-sample
    /// intensity difference residual.
    pub fn correction(
        &self,
        model: &ForwardModel,
        residual: &[f64],
    ) -> Result<DVector<f64>, SolverError> {
        let two_k = 2.0 * model.ray_scale_nm();
        match self {
            CorrectionStep::SeriesExpansion { inverse_gram } => {
                let mut projection = DVector::<f64>::zeros(N_FITTED);
                for (index, &d) in residual.iter().enumerate() {
                    if d == 0.0 {
                        continue;
                    }
                    for a in 0..N_FITTED {
                        projection[a] += model.term(index, a + FIRST_FITTED_NOLL).value * d;
                    }
                }
                Ok(inverse_gram * projection * (-1.0 / two_k))
            }
            CorrectionStep::Fft { pupil, fit } => {
                let size = model.geometry().size();
                let rho = model.geometry().radius_pixels();
                let scale = 1.0 / (two_k * rho * rho);

                let mut source = Array2::<f64>::zeros((size, size));
                for (sample, &d) in model.samples().iter().zip(residual) {
                    source[sample.pixel] = d * scale;
                }
                let phi = solve_poisson(&source.view())?;

                let values = DVector::from_iterator(
                    pupil.len(),
                    pupil.iter().map(|&index| phi[model.samples()[index].pixel]),
                );
                let coefficients = fit * values;
                Ok(DVector::from_iterator(
                    N_FITTED,
                    coefficients.iter().skip(FIRST_FITTED_NOLL - 1).copied(),
                ))
            }
        }
    }
}
