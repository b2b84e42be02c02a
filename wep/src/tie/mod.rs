//! Transport of Intensity Equation (TIE) wavefront estimation.
//!
//! [`WavefrontEstimator`] recovers Zernike coefficients z4..z22 (nm) from an
//! intra-focal/extra-focal donut pair.
//!
//! # Algorithm
//!
//! Both images are normalized to the nominal donut flux and the intra-focal
//! image is mirrored onto the extra-focal frame. Starting from a flat
//! wavefront, each iteration:
//!
//! 1. renders the pair the current estimate predicts ([`optics::ForwardModel`])
//! 2. takes the residual between the measured and predicted intensity
//!    differences
//! 3. turns the residual into a coefficient correction with the configured
//!    Poisson solver ([`poisson::CorrectionStep`])
//!
//! and stops once the L2 norm of the correction falls below the tolerance or
//! the iteration cap is hit. Tilts are solved for alongside z4..z22 and then
//! dropped.
//!
//! # Lifecycle
//!
//! `configure` → `set_image` (once per side) → `solve`. `reset` clears the
//! coefficient estimate and history but keeps configuration and images, so a
//! solver can be reused without being recreated. Setting a new image or
//! reconfiguring also clears the estimate.

pub mod optics;
pub mod poisson;

use nalgebra::DVector;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::image_proc::{DefocalSide, Image, PoissonError};
use shared::image_size::PixelShape;
use thiserror::Error;
use wep_math::ZernikeError;

use crate::config::{ConfigError, PoissonSolver, SolverConfig, SolverOptions};
use optics::ForwardModel;
use poisson::{CorrectionStep, FIRST_FITTED_NOLL, N_FITTED};

/// Number of reported coefficients, z4..z22.
pub const N_ZERNIKES: usize = 19;

/// Noll index of the first reported coefficient.
pub const FIRST_REPORTED_NOLL: usize = 4;

/// Errors from the wavefront solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("solver is not configured")]
    NotConfigured,

    #[error("no {side}-focal image has been set")]
    MissingImage { side: DefocalSide },

    #[error("{side}-focal image is {found}, expected {expected}x{expected}")]
    ImageShape {
        side: DefocalSide,
        expected: usize,
        found: PixelShape,
    },

    #[error("{side}-focal image has no flux inside the donut region")]
    EmptyImage { side: DefocalSide },

    #[error("{solver} system is singular")]
    SingularSystem { solver: PoissonSolver },

    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),

    #[error(transparent)]
    Zernike(#[from] ZernikeError),

    #[error(transparent)]
    Poisson(#[from] PoissonError),
}

/// Output of one solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavefrontResult {
    /// z4..z22 in nm
    pub zernikes_nm: [f64; N_ZERNIKES],
    /// Iterations performed
    pub iterations: usize,
    /// RMS of the intensity difference residual at the last iteration
    pub residual: f64,
    /// Whether the correction fell below the tolerance before the cap
    pub converged: bool,
}

impl WavefrontResult {
    /// Coefficient of Noll term `j` (4..=22).
    pub fn zernike(&self, j: usize) -> Option<f64> {
        j.checked_sub(FIRST_REPORTED_NOLL)
            .and_then(|k| self.zernikes_nm.get(k))
            .copied()
    }
}

#[derive(Debug, Clone)]
struct DonutImage {
    field_deg: (f64, f64),
    data: Array2<f64>,
}

/// Iteration-derived state, cleared by `reset`.
#[derive(Debug, Clone)]
struct IterationState {
    /// z2..z22 in nm
    coefficients: DVector<f64>,
    /// Correction norm per iteration
    history: Vec<f64>,
}

impl Default for IterationState {
    fn default() -> Self {
        Self {
            coefficients: DVector::zeros(N_FITTED),
            history: Vec::new(),
        }
    }
}

/// Iterative TIE solver for one donut pair at a time.
#[derive(Debug, Clone, Default)]
pub struct WavefrontEstimator {
    config: Option<SolverConfig>,
    model: Option<ForwardModel>,
    intra: Option<DonutImage>,
    extra: Option<DonutImage>,
    state: IterationState,
}

impl WavefrontEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and configure in one step.
    pub fn with_options(options: &SolverOptions) -> Result<Self, SolverError> {
        let mut estimator = Self::new();
        estimator.configure(options)?;
        Ok(estimator)
    }

    /// Validate and apply a configuration.
    ///
    /// On error the estimator is left exactly as it was. On success any
    /// images and iteration state are dropped.
    pub fn configure(&mut self, options: &SolverOptions) -> Result<(), SolverError> {
        let config = SolverConfig::from_options(options)?;
        let model = ForwardModel::new(&config.instrument, config.optical_model, config.image_size)?;

        log::debug!(
            "configured {} solver: {} {} model, {} px images",
            config.poisson_solver,
            config.instrument.name,
            config.optical_model,
            config.image_size
        );

        self.config = Some(config);
        self.model = Some(model);
        self.intra = None;
        self.extra = None;
        self.state = IterationState::default();
        Ok(())
    }

    pub fn config(&self) -> Option<&SolverConfig> {
        self.config.as_ref()
    }

    /// The forward model of the current configuration.
    pub fn forward_model(&self) -> Option<&ForwardModel> {
        self.model.as_ref()
    }

    /// Provide the donut for one side of focus.
    ///
    /// The image must be square with the configured side length; it is never
    /// cropped or padded.
    pub fn set_image(
        &mut self,
        field_deg: (f64, f64),
        image: &Image,
        side: DefocalSide,
    ) -> Result<(), SolverError> {
        let config = self.config.as_ref().ok_or(SolverError::NotConfigured)?;
        let shape = image.shape();
        if shape.width != config.image_size || shape.height != config.image_size {
            return Err(SolverError::ImageShape {
                side,
                expected: config.image_size,
                found: shape,
            });
        }

        let donut = DonutImage {
            field_deg,
            data: image.data().clone(),
        };
        match side {
            DefocalSide::Intra => self.intra = Some(donut),
            DefocalSide::Extra => self.extra = Some(donut),
        }
        self.state = IterationState::default();
        Ok(())
    }

    /// Clear the coefficient estimate and iteration history.
    pub fn reset(&mut self) {
        self.state = IterationState::default();
    }

    /// Correction norms of the iterations performed since the last reset.
    pub fn history(&self) -> &[f64] {
        &self.state.history
    }

    /// Iterate from the current estimate until the correction norm drops
    /// below `tolerance` (nm) or the iteration cap is reached.
    pub fn solve(&mut self, tolerance: f64) -> Result<WavefrontResult, SolverError> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(SolverError::InvalidTolerance(tolerance));
        }
        let config = self.config.as_ref().ok_or(SolverError::NotConfigured)?;
        let model = self.model.as_ref().ok_or(SolverError::NotConfigured)?;
        let intra = self.intra.as_ref().ok_or(SolverError::MissingImage {
            side: DefocalSide::Intra,
        })?;
        let extra = self.extra.as_ref().ok_or(SolverError::MissingImage {
            side: DefocalSide::Extra,
        })?;

        let start = std::time::Instant::now();
        let geometry = model.geometry();
        let measured_intra = normalize(model, &intra.data, DefocalSide::Intra)?;
        let measured_extra = normalize(model, &extra.data, DefocalSide::Extra)?;

        let mut measured_difference = Vec::with_capacity(model.samples().len());
        let mut weights = Vec::with_capacity(model.samples().len());
        for sample in model.samples() {
            let i = measured_intra[geometry.mirror(sample.pixel)];
            let e = measured_extra[sample.pixel];
            measured_difference.push(i - e);
            weights.push(0.5 * (i + e));
        }

        let step = CorrectionStep::prepare(config.poisson_solver, model, &weights)?;

        let mut state = self.state.clone();
        let mut residual_rms = f64::NAN;
        let mut converged = false;
        let mut iterations = 0;
        while iterations < config.max_iterations {
            iterations += 1;
            let coefficients = state.coefficients.as_slice();
            let model_intra = model.render_terms(
                FIRST_FITTED_NOLL,
                coefficients,
                DefocalSide::Intra,
                intra.field_deg,
            );
            let model_extra = model.render_terms(
                FIRST_FITTED_NOLL,
                coefficients,
                DefocalSide::Extra,
                extra.field_deg,
            );
            let model_intra = normalize(model, &model_intra, DefocalSide::Intra)?;
            let model_extra = normalize(model, &model_extra, DefocalSide::Extra)?;

            let residual: Vec<f64> = model
                .samples()
                .iter()
                .zip(&measured_difference)
                .map(|(sample, measured)| {
                    let predicted =
                        model_intra[geometry.mirror(sample.pixel)] - model_extra[sample.pixel];
                    measured - predicted
                })
                .collect();
            residual_rms =
                (residual.iter().map(|r| r * r).sum::<f64>() / residual.len() as f64).sqrt();

            let correction = step.correction(model, &residual)?;
            state.coefficients += &correction;
            let step_norm = correction.norm();
            state.history.push(step_norm);

            if config.verbosity > 0 {
                log::debug!(
                    "iteration {iterations}: |dz| = {step_norm:.4} nm, residual rms = {residual_rms:.3e}"
                );
            } else {
                log::trace!(
                    "iteration {iterations}: |dz| = {step_norm:.4} nm, residual rms = {residual_rms:.3e}"
                );
            }

            if step_norm < tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "wavefront solve stopped at the {} iteration cap without reaching tolerance {} nm",
                config.max_iterations,
                tolerance
            );
        }

        let mut zernikes_nm = [0.0; N_ZERNIKES];
        let offset = FIRST_REPORTED_NOLL - FIRST_FITTED_NOLL;
        for (k, z) in zernikes_nm.iter_mut().enumerate() {
            *z = state.coefficients[k + offset];
        }

        log::debug!(
            "{} solve finished after {} iterations in {:.1} ms (converged: {})",
            config.poisson_solver,
            iterations,
            start.elapsed().as_secs_f64() * 1000.0,
            converged
        );

        self.state = state;
        Ok(WavefrontResult {
            zernikes_nm,
            iterations,
            residual: residual_rms,
            converged,
        })
    }
}

/// Scale `image` so its flux over the sample region is the nominal donut
/// flux.
fn normalize(
    model: &ForwardModel,
    image: &Array2<f64>,
    side: DefocalSide,
) -> Result<Array2<f64>, SolverError> {
    let geometry = model.geometry();
    let flux: f64 = model
        .samples()
        .iter()
        .map(|sample| match side {
            DefocalSide::Extra => image[sample.pixel],
            DefocalSide::Intra => image[geometry.mirror(sample.pixel)],
        })
        .sum();
    if flux <= 0.0 || !flux.is_finite() {
        return Err(SolverError::EmptyImage { side });
    }
    Ok(image * (geometry.nominal_flux() / flux))
}
