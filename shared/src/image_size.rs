//! Image dimensions and size utilities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Represents the width and height of an image or template.
/// Uses usize for direct compatibility with ndarray indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelShape {
    /// Image width in pixels (columns)
    pub width: usize,
    /// Image height in pixels (rows)
    pub height: usize,
}

impl PixelShape {
    /// Create a new PixelShape
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Build from an ndarray `(rows, cols)` dimension tuple
    pub fn from_dim(dim: (usize, usize)) -> Self {
        Self {
            width: dim.1,
            height: dim.0,
        }
    }

    /// ndarray `(rows, cols)` dimension tuple
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

impl fmt::Display for PixelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_roundtrip_and_display() {
        let shape = PixelShape::from_dim((120, 160));
        assert_eq!(shape.width, 160);
        assert_eq!(shape.height, 120);
        assert_eq!(shape.dim(), (120, 160));
        assert_eq!(shape.to_string(), "160x120");
    }
}
