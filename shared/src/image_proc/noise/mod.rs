//! Noise generation for synthetic test frames
//!
//! - **generate**: seeded Gaussian noise fields

pub mod generate;

pub use generate::simple_normal_array;
