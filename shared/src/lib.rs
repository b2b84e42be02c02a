//! Shared image-processing components for the wavefront estimation pipeline.
//!
//! This crate holds the array-level building blocks that the detection,
//! deblending and wavefront stages all depend on, kept free of any
//! instrument or pipeline knowledge.

pub mod image_proc;
pub mod image_size;
