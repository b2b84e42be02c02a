//! Positional trait shared by detections, candidates and plain points.

use nalgebra::Vector2;

/// Trait for objects that have a 2D location.
///
/// By convention `x` is the column and `y` the row of an image array.
pub trait Locatable2d {
    /// Returns the x-coordinate of the object.
    fn x(&self) -> f64;

    /// Returns the y-coordinate of the object.
    fn y(&self) -> f64;
}

/// Implement Locatable for `nalgebra::Vector2<f64>`
impl Locatable2d for Vector2<f64> {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

impl Locatable2d for (f64, f64) {
    fn x(&self) -> f64 {
        self.0
    }

    fn y(&self) -> f64 {
        self.1
    }
}

impl Locatable2d for [f64; 2] {
    fn x(&self) -> f64 {
        self[0]
    }

    fn y(&self) -> f64 {
        self[1]
    }
}

/// Euclidean distance between two locatable objects.
pub fn distance<A: Locatable2d + ?Sized, B: Locatable2d + ?Sized>(a: &A, b: &B) -> f64 {
    (a.x() - b.x()).hypot(a.y() - b.y())
}
