//! Geometric optics of a defocused donut.
//!
//! A point `u` of the normalized pupil (unit outer radius) lands on the
//! defocused sensor at
//!
//! ```text
//! X(u) = σ P(u) + k ∇W(u)
//! ```
//!
//! in units of the donut radius, where `σ` is -1 intra-focal and +1
//! extra-focal, `P` is the optical model's pupil-to-image map, `W` is the
//! wavefront in nm and `k` converts nm of wavefront slope into donut radii.
//! Intensity is conserved along rays, so a pixel receives `A(u) / |det J|`
//! with `J = ∂X/∂u` and `A` the (apodized) pupil transmission.
//!
//! The paraxial model uses `P(u) = u`. The on-axis and off-axis models use
//! the fast-beam radial map `P(u) = u √(1-β²) / √(1-β²|u|²)`, `β = R/f`,
//! which keeps the pupil edge at radius 1 but pushes the obscuration edge
//! inwards. The off-axis model also decentres the obscuration with field
//! angle.
//!
//! # Sampling
//!
//! [`ForwardModel`] fixes one pupil point per image pixel: the point an
//! unaberrated extra-focal ray would send to that pixel. The intra-focal ray
//! from the same pupil point lands on the mirrored pixel, so both sides of a
//! pair share one sample set and the Zernike derivatives at every sample are
//! computed once. The wavefront slope near a sample is taken to first order
//! from the cached gradient and Hessian.

use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;
use shared::image_proc::DefocalSide;
use wep_math::zernike::{ZernikeBasis, ZernikeDerivatives, ZernikeError};
use wep_math::invert_matrix;

use crate::config::OpticalModel;
use crate::instrument::Instrument;

/// Highest Noll index modelled.
pub const MAX_NOLL: usize = 22;

/// Width of the apodized pupil edges in pixels.
const EDGE_WIDTH_PIXELS: f64 = 3.0;

/// Image radius, in donut radii, beyond which nothing is rendered.
const SAMPLE_EXTENT: f64 = 1.3;

const MAX_NEWTON_ITERATIONS: usize = 12;
const NEWTON_TOLERANCE: f64 = 1e-12;

/// Raised-cosine taper across an edge: 0 at `t = -0.5`, 1 at `t = 0.5`.
fn taper(t: f64) -> f64 {
    let s = (t + 0.5).clamp(0.0, 1.0);
    0.5 * (1.0 - (std::f64::consts::PI * s).cos())
}

/// Pupil and image geometry of one instrument and optical model on a square
/// pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PupilGeometry {
    model: OpticalModel,
    beta: f64,
    obscuration: f64,
    obscuration_shift_per_deg: f64,
    radius_pixels: f64,
    size: usize,
}

impl PupilGeometry {
    pub fn new(instrument: &Instrument, model: OpticalModel, size: usize) -> Self {
        Self {
            model,
            beta: instrument.beta(),
            obscuration: instrument.obscuration,
            obscuration_shift_per_deg: instrument.obscuration_shift_per_deg,
            radius_pixels: instrument.donut_radius_pixels(model),
            size,
        }
    }

    pub fn model(&self) -> OpticalModel {
        self.model
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Donut radius in pixels.
    pub fn radius_pixels(&self) -> f64 {
        self.radius_pixels
    }

    /// Grid centre, `(size - 1) / 2` on both axes.
    pub fn center(&self) -> f64 {
        (self.size as f64 - 1.0) / 2.0
    }

    /// Image coordinates of a pixel centre in donut radii (x = column).
    pub fn image_coords(&self, row: usize, col: usize) -> Vector2<f64> {
        let c = self.center();
        Vector2::new(
            (col as f64 - c) / self.radius_pixels,
            (row as f64 - c) / self.radius_pixels,
        )
    }

    /// Pixel reflected through the grid centre.
    pub fn mirror(&self, (row, col): (usize, usize)) -> (usize, usize) {
        (self.size - 1 - row, self.size - 1 - col)
    }

    /// Nominal flux of a donut at unit surface brightness, in pixels.
    pub fn nominal_flux(&self) -> f64 {
        std::f64::consts::PI
            * (1.0 - self.obscuration * self.obscuration)
            * self.radius_pixels
            * self.radius_pixels
    }

    fn is_paraxial(&self) -> bool {
        self.model == OpticalModel::Paraxial
    }

    /// Pupil-to-image map `P(u)` and its Jacobian.
    ///
    /// Returns `None` where the fast-beam map is undefined (`β|u| >= 1`).
    pub fn project(&self, u: &Vector2<f64>) -> Option<(Vector2<f64>, Matrix2<f64>)> {
        if self.is_paraxial() {
            return Some((*u, Matrix2::identity()));
        }
        let b2 = self.beta * self.beta;
        let denom = 1.0 - b2 * u.norm_squared();
        if denom <= 0.0 {
            return None;
        }
        let root = (1.0 - b2).sqrt();
        let g = root / denom.sqrt();
        let h = root * b2 / denom.powf(1.5);
        Some((u * g, Matrix2::identity() * g + (u * u.transpose()) * h))
    }

    /// Inverse of [`project`](Self::project), in closed form.
    pub fn unproject(&self, x: &Vector2<f64>) -> Vector2<f64> {
        if self.is_paraxial() {
            return *x;
        }
        let b2 = self.beta * self.beta;
        x / (1.0 - b2 + b2 * x.norm_squared()).sqrt()
    }

    /// Centre of the obscuration in pupil units for a field angle.
    fn obscuration_center(&self, field_deg: (f64, f64)) -> Vector2<f64> {
        match self.model {
            OpticalModel::OffAxis => {
                Vector2::new(field_deg.0, field_deg.1) * self.obscuration_shift_per_deg
            }
            OpticalModel::Paraxial | OpticalModel::OnAxis => Vector2::zeros(),
        }
    }

    /// Apodized pupil transmission at `u`.
    pub fn aperture(&self, u: &Vector2<f64>, field_deg: (f64, f64)) -> f64 {
        let edge = EDGE_WIDTH_PIXELS / self.radius_pixels;
        let outer = taper((1.0 - u.norm()) / edge);
        if outer == 0.0 {
            return 0.0;
        }
        let from_obscuration = (u - self.obscuration_center(field_deg)).norm();
        outer * taper((from_obscuration - self.obscuration) / edge)
    }

    /// Binary footprint of an unaberrated donut: pixels whose pupil point
    /// transmits more than half.
    pub fn footprint(&self, side: DefocalSide, field_deg: (f64, f64)) -> Array2<f64> {
        let sigma = side.sign();
        Array2::from_shape_fn((self.size, self.size), |(row, col)| {
            let u = self.unproject(&self.image_coords(row, col)) * sigma;
            if self.aperture(&u, field_deg) > 0.5 {
                1.0
            } else {
                0.0
            }
        })
    }
}

/// One pupil sample: an extra-focal pixel and the pupil point it sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilSample {
    /// (row, col) in the extra-focal frame; the intra-focal pixel is mirrored
    pub pixel: (usize, usize),
    /// Image coordinates of the pixel in donut radii
    pub image: Vector2<f64>,
    /// Pupil point, unit outer radius
    pub pupil: Vector2<f64>,
}

/// Renders donut images for a wavefront given as Zernike coefficients.
#[derive(Debug, Clone)]
pub struct ForwardModel {
    geometry: PupilGeometry,
    ray_scale_nm: f64,
    samples: Vec<PupilSample>,
    /// Derivatives of Z_1..=Z_MAX_NOLL at each sample, sample-major
    terms: Vec<ZernikeDerivatives>,
}

impl ForwardModel {
    pub fn new(
        instrument: &Instrument,
        model: OpticalModel,
        size: usize,
    ) -> Result<Self, ZernikeError> {
        let geometry = PupilGeometry::new(instrument, model, size);
        let basis = ZernikeBasis::new(MAX_NOLL)?;

        let mut samples = Vec::new();
        let mut terms = Vec::new();
        for row in 0..size {
            for col in 0..size {
                let image = geometry.image_coords(row, col);
                if image.norm() > SAMPLE_EXTENT {
                    continue;
                }
                let pupil = geometry.unproject(&image);
                for j in 1..=MAX_NOLL {
                    terms.push(basis.term(j)?.derivatives(pupil.x, pupil.y));
                }
                samples.push(PupilSample {
                    pixel: (row, col),
                    image,
                    pupil,
                });
            }
        }

        log::debug!(
            "forward model {} on {}x{} grid: donut radius {:.1} px, {} samples",
            model,
            size,
            size,
            geometry.radius_pixels(),
            samples.len()
        );

        Ok(Self {
            ray_scale_nm: instrument.ray_scale(model) * 1e-9,
            geometry,
            samples,
            terms,
        })
    }

    pub fn geometry(&self) -> &PupilGeometry {
        &self.geometry
    }

    pub fn samples(&self) -> &[PupilSample] {
        &self.samples
    }

    /// Image displacement in donut radii per nm of normalized wavefront slope.
    pub fn ray_scale_nm(&self) -> f64 {
        self.ray_scale_nm
    }

    /// Derivatives of `Z_j` at sample `index`.
    pub fn term(&self, index: usize, j: usize) -> &ZernikeDerivatives {
        &self.terms[index * MAX_NOLL + j - 1]
    }

    /// Wavefront `Σ c_k Z_{first_j + k}` at sample `index`. Terms past
    /// `MAX_NOLL` are ignored.
    pub fn wavefront(&self, index: usize, first_j: usize, coefficients: &[f64]) -> ZernikeDerivatives {
        let mut total = ZernikeDerivatives::default();
        for (k, &c) in coefficients.iter().enumerate() {
            let j = first_j + k;
            if c != 0.0 && (1..=MAX_NOLL).contains(&j) {
                total.add_scaled(self.term(index, j), c);
            }
        }
        total
    }

    /// Render a donut for Zernike coefficients z4, z5, ... in nm.
    pub fn render(&self, zernikes_nm: &[f64], side: DefocalSide, field_deg: (f64, f64)) -> Array2<f64> {
        self.render_terms(4, zernikes_nm, side, field_deg)
    }

    /// Render a donut for coefficients of `Z_{first_j}, Z_{first_j + 1}, ...`.
    pub fn render_terms(
        &self,
        first_j: usize,
        coefficients: &[f64],
        side: DefocalSide,
        field_deg: (f64, f64),
    ) -> Array2<f64> {
        let size = self.geometry.size();
        let mut image = Array2::zeros((size, size));
        for (index, sample) in self.samples.iter().enumerate() {
            let wavefront = self.wavefront(index, first_j, coefficients);
            if let Some(value) = self.ray_intensity(sample, &wavefront, side, field_deg) {
                let pixel = match side {
                    DefocalSide::Extra => sample.pixel,
                    DefocalSide::Intra => self.geometry.mirror(sample.pixel),
                };
                image[pixel] = value;
            }
        }
        image
    }

    /// Intensity at the sample's pixel on `side`: find the pupil point that
    /// lands there (Newton from the unaberrated point) and divide its
    /// transmission by the ray map Jacobian.
    fn ray_intensity(
        &self,
        sample: &PupilSample,
        wavefront: &ZernikeDerivatives,
        side: DefocalSide,
        field_deg: (f64, f64),
    ) -> Option<f64> {
        let sigma = side.sign();
        let k = self.ray_scale_nm;
        let u0 = sample.pupil;
        let target = sample.image * sigma;
        let gradient = Vector2::new(wavefront.dx, wavefront.dy);
        let hessian = Matrix2::new(wavefront.dxx, wavefront.dxy, wavefront.dxy, wavefront.dyy);

        let mut u = u0;
        let mut jacobian = Matrix2::zeros();
        let mut converged = false;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p, dp) = self.geometry.project(&u)?;
            let slope = gradient + hessian * (u - u0);
            let residual = p * sigma + slope * k - target;
            jacobian = dp * sigma + hessian * k;
            if residual.norm() < NEWTON_TOLERANCE {
                converged = true;
                break;
            }
            let inverse = invert_matrix(&jacobian).ok()?;
            u -= inverse * residual;
        }
        if !converged {
            return None;
        }

        let transmission = self.geometry.aperture(&u, field_deg);
        if transmission == 0.0 {
            return Some(0.0);
        }
        let det = jacobian.determinant().abs();
        if det < 1e-12 {
            return None;
        }
        Some(transmission / det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn lsst15() -> Instrument {
        Instrument::from_name("lsst15").unwrap()
    }

    fn mean_radius(image: &Array2<f64>, geometry: &PupilGeometry) -> f64 {
        let c = geometry.center();
        let mut weighted = 0.0;
        let mut total = 0.0;
        for ((row, col), &v) in image.indexed_iter() {
            weighted += v * (row as f64 - c).hypot(col as f64 - c);
            total += v;
        }
        weighted / total
    }

    #[test]
    fn test_unproject_inverts_project() {
        let geometry = PupilGeometry::new(&lsst15(), OpticalModel::OnAxis, 160);
        for u in [
            Vector2::new(0.3, -0.2),
            Vector2::new(0.0, 0.95),
            Vector2::new(-0.61, 0.1),
        ] {
            let (x, _) = geometry.project(&u).unwrap();
            let back = geometry.unproject(&x);
            assert_relative_eq!(back, u, epsilon = 1e-12);
        }
        // The pupil edge stays at one donut radius
        let (edge, _) = geometry.project(&Vector2::new(1.0, 0.0)).unwrap();
        assert_relative_eq!(edge.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_project_jacobian_matches_finite_difference() {
        let geometry = PupilGeometry::new(&lsst15(), OpticalModel::OffAxis, 160);
        let u = Vector2::new(0.4, 0.7);
        let (_, jac) = geometry.project(&u).unwrap();
        let h = 1e-6;
        for axis in 0..2 {
            let mut step = Vector2::zeros();
            step[axis] = h;
            let (plus, _) = geometry.project(&(u + step)).unwrap();
            let (minus, _) = geometry.project(&(u - step)).unwrap();
            let column = (plus - minus) / (2.0 * h);
            assert_relative_eq!(column, jac.column(axis).into_owned(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_footprint_area() {
        let geometry = PupilGeometry::new(&lsst15(), OpticalModel::OnAxis, 160);
        let mask = geometry.footprint(DefocalSide::Extra, (0.0, 0.0));
        let rho = geometry.radius_pixels();
        let (inner, _) = geometry.project(&Vector2::new(0.61, 0.0)).unwrap();
        let expected = std::f64::consts::PI * rho * rho * (1.0 - inner.x * inner.x);
        assert_relative_eq!(mask.sum(), expected, max_relative = 0.03);
    }

    #[test]
    fn test_off_axis_obscuration_decentres_footprint() {
        let geometry = PupilGeometry::new(&lsst15(), OpticalModel::OffAxis, 160);
        let centred = geometry.footprint(DefocalSide::Extra, (0.0, 0.0));
        let shifted = geometry.footprint(DefocalSide::Extra, (1.5, 0.0));
        assert_ne!(centred, shifted);

        // Obscuration moves to +x, so the ring thins on the +x side
        let c = geometry.center() as usize;
        let right: f64 = shifted.row(c).iter().skip(c).sum();
        let left: f64 = shifted.row(c).iter().take(c).sum();
        assert!(right < left);
    }

    #[test]
    fn test_unaberrated_sides_mirror_each_other() {
        let model = ForwardModel::new(&lsst15(), OpticalModel::OnAxis, 160).unwrap();
        let extra = model.render(&[], DefocalSide::Extra, (0.0, 0.0));
        let intra = model.render(&[], DefocalSide::Intra, (0.0, 0.0));
        for sample in model.samples() {
            let mirrored = model.geometry().mirror(sample.pixel);
            assert_abs_diff_eq!(extra[sample.pixel], intra[mirrored], epsilon = 1e-12);
        }
        assert!(extra.sum() > 0.0);
    }

    #[test]
    fn test_paraxial_unaberrated_intensity_is_transmission() {
        let model = ForwardModel::new(&lsst15(), OpticalModel::Paraxial, 120).unwrap();
        let extra = model.render(&[], DefocalSide::Extra, (0.0, 0.0));
        let geometry = model.geometry();
        for sample in model.samples() {
            let expected = geometry.aperture(&sample.pupil, (0.0, 0.0));
            assert_abs_diff_eq!(extra[sample.pixel], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_defocus_grows_extra_and_shrinks_intra() {
        let model = ForwardModel::new(&lsst15(), OpticalModel::OnAxis, 160).unwrap();
        let extra = model.render(&[500.0], DefocalSide::Extra, (0.0, 0.0));
        let intra = model.render(&[500.0], DefocalSide::Intra, (0.0, 0.0));
        let geometry = model.geometry();
        let difference = mean_radius(&extra, geometry) - mean_radius(&intra, geometry);
        assert!(difference > 0.7, "radius difference {difference}");
    }
}
