//! Template convolution deblending.
//!
//! The binary stamp is correlated with the closed binary template. The
//! strongest correlation pixel is a donut centre; every pixel within one
//! template radius of it is then suppressed and the next strongest taken,
//! until one peak per donut is found. The neighbour footprint is the binary
//! template moved so its centroid sits on the neighbour peak.

use ndarray::{s, Array2};
use shared::image_proc::{correlate, translate};

use super::{BinaryTemplate, DeblendError, DeblendMethod, DeblendStrategy};

/// Deblending by binary template correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateConvolution {
    /// Suppression radius as a fraction of the template's characteristic
    /// radius
    pub suppression_scale: f64,
}

impl Default for TemplateConvolution {
    fn default() -> Self {
        Self {
            suppression_scale: 1.0,
        }
    }
}

/// Up to `count` peaks of `values`, strongest first, suppressing everything
/// within `radius` of each accepted peak. Ties go to the first pixel in
/// row-major order. Only positive values count as peaks.
pub fn suppressed_peaks(values: &Array2<f64>, count: usize, radius: f64) -> Vec<(f64, f64)> {
    let mut work = values.clone();
    let mut peaks = Vec::with_capacity(count);
    while peaks.len() < count {
        let mut best: Option<((usize, usize), f64)> = None;
        for (index, &v) in work.indexed_iter() {
            if v > 0.0 && best.map_or(true, |(_, b)| v > b) {
                best = Some((index, v));
            }
        }
        let Some(((row, col), _)) = best else {
            break;
        };
        peaks.push((col as f64, row as f64));

        let r2 = radius * radius;
        for ((r, c), v) in work.indexed_iter_mut() {
            let dr = r as f64 - row as f64;
            let dc = c as f64 - col as f64;
            if dr * dr + dc * dc <= r2 {
                *v = 0.0;
            }
        }
    }
    peaks
}

impl DeblendStrategy for TemplateConvolution {
    fn method(&self) -> DeblendMethod {
        DeblendMethod::TemplateConvolution
    }

    fn uses_template(&self) -> bool {
        true
    }

    fn detect_peaks(
        &self,
        binary_image: &Array2<f64>,
        template: Option<&BinaryTemplate>,
        guesses: &[(f64, f64)],
    ) -> Result<Vec<(f64, f64)>, DeblendError> {
        let template = template.ok_or(DeblendError::EmptyTemplate)?;
        let correlated = correlate(&binary_image.view(), &template.mask.view())?;
        let radius = self.suppression_scale * template.shape.radius;
        Ok(suppressed_peaks(&correlated, guesses.len() + 1, radius))
    }

    fn separate_flux(
        &self,
        binary_image: &Array2<f64>,
        template: Option<&BinaryTemplate>,
        _main: (f64, f64),
        neighbor: (f64, f64),
    ) -> Result<Array2<f64>, DeblendError> {
        let template = template.ok_or(DeblendError::EmptyTemplate)?;

        // Template in the top-left corner of a stamp-sized frame
        let mut frame = Array2::zeros(binary_image.dim());
        let (rows, cols) = template.mask.dim();
        frame.slice_mut(s![..rows, ..cols]).assign(&template.mask);

        let dx = (neighbor.0 - template.shape.x) as isize;
        let dy = (neighbor.1 - template.shape.y) as isize;
        Ok(translate(&frame.view(), dx, dy))
    }
}
