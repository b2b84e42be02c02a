//! Flux ranking of unblended donuts.
//!
//! The flux proxy of a candidate is the correlation of the raw exposure with
//! the raw template at the candidate's (rounded) centre. No thresholding is
//! applied, so the proxy scales with source brightness.

use ndarray::Array2;
use shared::image_proc::{correlate, CorrelationError, Image};
use thiserror::Error;

use crate::blend::DonutCandidate;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FluxError {
    #[error("no unblended donuts to rank")]
    NoUnblendedSources,

    #[error("flux correlation failed: {0}")]
    Correlation(#[from] CorrelationError),
}

/// Correlation value nearest `(x, y)`, clamped into the array.
fn lookup(correlated: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (rows, cols) = correlated.dim();
    let row = (y.round().max(0.0) as usize).min(rows - 1);
    let col = (x.round().max(0.0) as usize).min(cols - 1);
    correlated[[row, col]]
}

/// Unblended candidates with their flux set, brightest first.
///
/// Ties keep input order. Fails with [`FluxError::NoUnblendedSources`] when
/// every candidate is blended.
pub fn rank_by_flux(
    candidates: &[DonutCandidate],
    exposure: &Image,
    template: &Image,
) -> Result<Vec<DonutCandidate>, FluxError> {
    let unblended: Vec<&DonutCandidate> = candidates.iter().filter(|c| !c.blended).collect();
    if unblended.is_empty() {
        return Err(FluxError::NoUnblendedSources);
    }

    let correlated = correlate(&exposure.view(), &template.view())?;
    let mut ranked: Vec<DonutCandidate> = unblended
        .into_iter()
        .map(|c| DonutCandidate {
            flux: Some(lookup(&correlated, c.x_center, c.y_center)),
            ..c.clone()
        })
        .collect();
    ranked.sort_by(|a, b| {
        let fa = a.flux.unwrap_or(f64::NEG_INFINITY);
        let fb = b.flux.unwrap_or(f64::NEG_INFINITY);
        fb.total_cmp(&fa)
    });

    log::debug!(
        "ranked {} of {} donuts by flux",
        ranked.len(),
        candidates.len()
    );
    Ok(ranked)
}
