//! Centroid and size of binary shapes, and integer translation of arrays
//!
//! The deblender needs the centroid and characteristic radius of a binary
//! donut template and a way to move that footprint onto a detected peak.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Position and size of the foreground of a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryShape {
    /// Centroid column
    pub x: f64,
    /// Centroid row
    pub y: f64,
    /// Number of foreground pixels
    pub area: f64,
    /// Radius of the disk with the same area, `sqrt(area / π)`
    pub radius: f64,
}

/// Centroid of the non-zero pixels of `mask`, or `None` if it is empty.
pub fn binary_centroid(mask: &ArrayView2<f64>) -> Option<BinaryShape> {
    let mut count = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;

    for ((row, col), &v) in mask.indexed_iter() {
        if v != 0.0 {
            count += 1.0;
            sum_x += col as f64;
            sum_y += row as f64;
        }
    }

    if count == 0.0 {
        return None;
    }

    Some(BinaryShape {
        x: sum_x / count,
        y: sum_y / count,
        area: count,
        radius: (count / std::f64::consts::PI).sqrt(),
    })
}

/// Shift `array` by `dx` columns and `dy` rows, filling vacated pixels with
/// zero. Content shifted past the edge is dropped.
pub fn translate(array: &ArrayView2<f64>, dx: isize, dy: isize) -> Array2<f64> {
    let (rows, cols) = array.dim();
    let mut out = Array2::zeros((rows, cols));

    for ((row, col), &v) in array.indexed_iter() {
        let r = row as isize + dy;
        let c = col as isize + dx;
        if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
            out[[r as usize, c as usize]] = v;
        }
    }

    out
}
