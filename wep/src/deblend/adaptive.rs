//! Template-free deblending from the binary autocorrelation.
//!
//! A stamp holding two copies of the same donut offset by `d` has an
//! autocorrelation with secondary peaks at `±d`. The neighbour guess picks
//! the sign: the union centroid sits halfway between the donuts, so the
//! guessed offset is twice the vector from that centroid to the guess. The
//! strongest autocorrelation lag within half the guessed offset's length of
//! it is taken as `d`.

use ndarray::Array2;
use shared::image_proc::{binary_centroid, correlate, translate};

use super::{BinaryTemplate, DeblendError, DeblendMethod, DeblendStrategy};

/// Autocorrelation deblending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adaptive;

impl Adaptive {
    /// Integer lag from the main donut to the neighbour.
    pub fn neighbor_lag(
        &self,
        binary_image: &Array2<f64>,
        guess: (f64, f64),
    ) -> Result<((f64, f64), (isize, isize)), DeblendError> {
        let union = binary_centroid(&binary_image.view()).ok_or(DeblendError::EmptyImage)?;
        let expected = (2.0 * (guess.0 - union.x), 2.0 * (guess.1 - union.y));
        let reach = 0.5 * expected.0.hypot(expected.1);
        if reach < 1.0 {
            return Err(DeblendError::PeakCount {
                expected: 2,
                found: 1,
            });
        }

        let autocorrelation = correlate(&binary_image.view(), &binary_image.view())?;
        let (rows, cols) = autocorrelation.dim();
        let (zero_row, zero_col) = ((rows / 2) as isize, (cols / 2) as isize);

        let mut best: Option<((isize, isize), f64)> = None;
        for ((row, col), &v) in autocorrelation.indexed_iter() {
            let lag = (col as isize - zero_col, row as isize - zero_row);
            let miss = (lag.0 as f64 - expected.0).hypot(lag.1 as f64 - expected.1);
            if miss <= reach && v > 0.0 && best.map_or(true, |(_, b)| v > b) {
                best = Some((lag, v));
            }
        }

        let (lag, _) = best.ok_or(DeblendError::PeakCount {
            expected: 2,
            found: 1,
        })?;
        Ok(((union.x, union.y), lag))
    }
}

impl DeblendStrategy for Adaptive {
    fn method(&self) -> DeblendMethod {
        DeblendMethod::Adaptive
    }

    fn uses_template(&self) -> bool {
        false
    }

    fn detect_peaks(
        &self,
        binary_image: &Array2<f64>,
        _template: Option<&BinaryTemplate>,
        guesses: &[(f64, f64)],
    ) -> Result<Vec<(f64, f64)>, DeblendError> {
        let guess = guesses.first().copied().ok_or(DeblendError::PeakCount {
            expected: 2,
            found: 0,
        })?;
        let (center, (dx, dy)) = self.neighbor_lag(binary_image, guess)?;
        let half = (0.5 * dx as f64, 0.5 * dy as f64);
        Ok(vec![
            (center.0 - half.0, center.1 - half.1),
            (center.0 + half.0, center.1 + half.1),
        ])
    }

    fn separate_flux(
        &self,
        binary_image: &Array2<f64>,
        _template: Option<&BinaryTemplate>,
        main: (f64, f64),
        neighbor: (f64, f64),
    ) -> Result<Array2<f64>, DeblendError> {
        let dx = (neighbor.0 - main.0).round() as isize;
        let dy = (neighbor.1 - main.1).round() as isize;
        let shifted = translate(&binary_image.view(), dx, dy);
        Ok(Array2::from_shape_fn(binary_image.dim(), |index| {
            if binary_image[index] != 0.0 && shifted[index] != 0.0 {
                1.0
            } else {
                0.0
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::donuts;
    use super::*;
    use shared::image_proc::Image;

    #[test]
    fn test_deblends_vertical_pair_without_template() {
        let image = Image::new(donuts(160, &[(50.0, 80.0), (100.0, 80.0)]));
        // Ignored by this strategy
        let template = Image::new(Array2::zeros((4, 4)));

        let result = Adaptive.deblend(&image, &[(80.0, 50.0)], &template).unwrap();
        assert_eq!(result.offset_x, 0);
        assert_eq!(result.offset_y, -50);
        assert!((result.neighbor_center.0 - 80.0).abs() < 1e-9);
        assert!((result.neighbor_center.1 - 50.0).abs() < 1e-9);
        assert!((result.main_center.1 - 100.0).abs() < 1e-9);

        // Footprint covers the neighbour ring and not the far side of the
        // main ring
        assert_eq!(result.neighbor_footprint[[50, 80 + 30]], 1.0);
        assert_eq!(result.neighbor_footprint[[50, 80]], 0.0);
        assert_eq!(result.neighbor_footprint[[130, 80]], 0.0);
    }

    #[test]
    fn test_guess_at_union_centroid_is_ambiguous() {
        let binary = donuts(160, &[(50.0, 80.0), (100.0, 80.0)]).mapv(|v| v.min(1.0));
        assert!(matches!(
            Adaptive.neighbor_lag(&binary, (80.0, 75.0)),
            Err(DeblendError::PeakCount { .. })
        ));
    }
}
