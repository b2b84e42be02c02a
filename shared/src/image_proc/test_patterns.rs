//! Synthetic donut patterns for detection and deblending validation
//!
//! Provides a binary annulus generator and a stamp placement helper so
//! tests can build frames with donuts at known positions.

use std::ops::AddAssign;

use ndarray::{s, Array2};
use num_traits::Zero;

/// Generate a binary annulus centred in a `size` x `size` array
///
/// A pixel is set when its centre lies within `inner_radius < r <= outer_radius`
/// of the array centre `((size - 1) / 2, (size - 1) / 2)`.
///
/// # Arguments
/// * `size` - Side length of the output array
/// * `outer_radius` - Outer radius in pixels
/// * `inner_radius` - Radius of the central obscuration in pixels
///
/// # Returns
/// Array2 with 1.0 inside the annulus and 0.0 elsewhere
pub fn annulus(size: usize, outer_radius: f64, inner_radius: f64) -> Array2<f64> {
    let center = (size as f64 - 1.0) / 2.0;
    Array2::from_shape_fn((size, size), |(row, col)| {
        let r = (row as f64 - center).hypot(col as f64 - center);
        if r <= outer_radius && r > inner_radius {
            1.0
        } else {
            0.0
        }
    })
}

/// How a stamp combines with the frame pixels it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceMode {
    /// Replace covered pixels, including with the stamp's zeros
    Overwrite,
    /// Add the stamp to the covered pixels
    Add,
}

/// Place `stamp` into `frame` with its top-left corner at `(top, left)`
///
/// The part of the stamp falling outside the frame is dropped.
pub fn place<T>(frame: &mut Array2<T>, stamp: &Array2<T>, top: usize, left: usize, mode: PlaceMode)
where
    T: Clone + Zero + AddAssign,
{
    let (rows, cols) = frame.dim();
    if top >= rows || left >= cols {
        return;
    }
    let h = stamp.nrows().min(rows - top);
    let w = stamp.ncols().min(cols - left);

    let mut target = frame.slice_mut(s![top..top + h, left..left + w]);
    let source = stamp.slice(s![..h, ..w]);
    match mode {
        PlaceMode::Overwrite => target.assign(&source),
        PlaceMode::Add => target.zip_mut_with(&source, |t, v| *t += v.clone()),
    }
}
