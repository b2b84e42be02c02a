//! wep - Donut detection, deblending and wavefront estimation
//!
//! Works on out-of-focus ("donut") star images from curvature wavefront
//! sensors:
//!
//! - **detection**: binarize an exposure and a donut template, correlate
//!   them and cluster the correlation peaks into donut candidates
//! - **blend**: label candidates closer than a blend radius
//! - **flux**: rank unblended candidates by correlation flux
//! - **deblend**: separate a donut from a single overlapping neighbour
//! - **selection** / **catalog**: per-sensor source selection and export
//! - **tie**: recover Zernike coefficients z4..z22 from an intra/extra-focal
//!   donut pair by iterating the Transport of Intensity Equation
//!
//! Supporting modules hold the configuration surface (`config`), the
//! instrument table (`instrument`) and the template provider (`template`).
//!
//! # Example
//!
//! ```text
//! use wep::{SolverOptions, WavefrontEstimator};
//! use shared::image_proc::DefocalSide;
//!
//! let mut solver = WavefrontEstimator::with_options(&SolverOptions::default())?;
//! solver.set_image((1.2, 0.4), &intra, DefocalSide::Intra)?;
//! solver.set_image((1.2, 0.4), &extra, DefocalSide::Extra)?;
//! let result = solver.solve(0.1)?;
//! println!("defocus: {:.1} nm", result.zernikes_nm[0]);
//! ```

pub mod blend;
pub mod catalog;
pub mod config;
pub mod deblend;
pub mod detection;
pub mod flux;
pub mod instrument;
pub mod selection;
pub mod template;
pub mod tie;

pub use blend::{label_blends, BlendGraph, DonutCandidate};
pub use catalog::{write_source_file, write_source_table, CatalogError, TableColumns};
pub use config::{
    ConfigError, DetectionConfig, OpticalModel, PoissonSolver, RetryConfig, SelectionConfig,
    SolverConfig, SolverOptions,
};
pub use deblend::{
    create_deblender, DeblendEngine, DeblendError, DeblendMethod, DeblendResult, DeblendStrategy,
};
pub use detection::{DetectionError, DonutDetector};
pub use flux::{rank_by_flux, FluxError};
pub use instrument::Instrument;
pub use selection::{
    detect_with_minimum, filter_blends_by_magnitude, select_sources, CoordinateMode, PixelToSky,
    SelectedSource, SelectionError,
};
pub use template::{TemplateError, TemplateKind, TemplateProvider};
pub use tie::{SolverError, WavefrontEstimator, WavefrontResult};
