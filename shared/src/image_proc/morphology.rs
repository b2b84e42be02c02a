//! Binary morphology with the 3x3 cross structuring element.
//!
//! Masks are `f64` arrays where any non-zero pixel is foreground, the same
//! representation the binarizer produces. Pixels outside the array count as
//! background, so erosion removes foreground touching the border.

use ndarray::{Array2, ArrayView2};

const CROSS: [(isize, isize); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];

fn is_set(mask: &ArrayView2<f64>, r: isize, c: isize) -> bool {
    let (rows, cols) = mask.dim();
    r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]] != 0.0
}

/// Set every pixel with at least one foreground pixel under the cross.
pub fn binary_dilation(mask: &ArrayView2<f64>) -> Array2<f64> {
    Array2::from_shape_fn(mask.dim(), |(r, c)| {
        let hit = CROSS
            .iter()
            .any(|&(dr, dc)| is_set(mask, r as isize + dr, c as isize + dc));
        if hit {
            1.0
        } else {
            0.0
        }
    })
}

/// Keep only pixels whose whole cross neighbourhood is foreground.
pub fn binary_erosion(mask: &ArrayView2<f64>) -> Array2<f64> {
    Array2::from_shape_fn(mask.dim(), |(r, c)| {
        let all = CROSS
            .iter()
            .all(|&(dr, dc)| is_set(mask, r as isize + dr, c as isize + dc));
        if all {
            1.0
        } else {
            0.0
        }
    })
}

/// Dilation followed by erosion: fills one-pixel gaps and pits left by
/// thresholding while preserving the outline.
pub fn binary_closing(mask: &ArrayView2<f64>) -> Array2<f64> {
    let dilated = binary_dilation(mask);
    binary_erosion(&dilated.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn test_dilation_of_single_pixel_is_cross() {
        let mut mask = Array2::zeros((5, 5));
        mask[[2, 2]] = 1.0;
        let dilated = binary_dilation(&mask.view());
        assert_eq!(dilated.sum(), 5.0);
        assert_eq!(dilated[[1, 2]], 1.0);
        assert_eq!(dilated[[1, 1]], 0.0);
    }

    #[test]
    fn test_erosion_clears_border_contact() {
        let mask = Array2::ones((4, 4));
        let eroded = binary_erosion(&mask.view());
        assert_eq!(eroded.sum(), 4.0);
        assert_eq!(eroded[[0, 0]], 0.0);
        assert_eq!(eroded[[1, 1]], 1.0);
    }

    #[test]
    fn test_closing_fills_pinhole() {
        let mut mask = Array2::zeros((9, 9));
        mask.slice_mut(s![2..7, 2..7]).fill(1.0);
        mask[[4, 4]] = 0.0;
        let closed = binary_closing(&mask.view());
        assert_eq!(closed[[4, 4]], 1.0);
        assert_eq!(closed.slice(s![2..7, 2..7]).sum(), 25.0);
        assert_eq!(closed.sum(), 25.0);
    }
}
