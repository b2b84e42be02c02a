//! Zernike polynomials on the unit disk, Noll indexed
//!
//! Each polynomial is stored as an exact 2D polynomial
//!
//! ```text
//! Z_j(x, y) = N Σ_k c_k (x² + y²)^p_k · Re/Im((x + iy)^|m|)
//! ```
//!
//! which avoids the polar singularity at the origin and gives closed-form
//! gradients and Hessians. The wavefront solver needs both: gradients for the
//! ray map and Hessians for the intensity compensation Jacobian.
//!
//! Normalization follows Noll (1976): the RMS of every term over the unit
//! disk is 1, with `N = √(n+1)` for rotationally symmetric terms and
//! `N = √(2(n+1))` otherwise. Even `j` carries `cos(mθ)`, odd `j` carries
//! `sin(mθ)`.

use nalgebra::Complex;
use thiserror::Error;

/// Errors from Zernike basis construction and lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZernikeError {
    #[error("Noll index must be >= 1, got {0}")]
    InvalidIndex(usize),

    #[error("Noll index {index} is outside the basis (1..={max})")]
    OutOfRange { index: usize, max: usize },
}

/// Value and derivatives of a polynomial (or a weighted sum of them) at one
/// point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZernikeDerivatives {
    pub value: f64,
    pub dx: f64,
    pub dy: f64,
    pub dxx: f64,
    pub dxy: f64,
    pub dyy: f64,
}

impl ZernikeDerivatives {
    /// Accumulate `weight * other` into `self`.
    pub fn add_scaled(&mut self, other: &ZernikeDerivatives, weight: f64) {
        self.value += weight * other.value;
        self.dx += weight * other.dx;
        self.dy += weight * other.dy;
        self.dxx += weight * other.dxx;
        self.dxy += weight * other.dxy;
        self.dyy += weight * other.dyy;
    }

    /// Laplacian `dxx + dyy`.
    pub fn laplacian(&self) -> f64 {
        self.dxx + self.dyy
    }
}

/// Angular part of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Angular {
    Radial,
    Cos,
    Sin,
}

/// Convert a Noll index into radial order `n` and signed azimuthal order `m`.
///
/// Negative `m` denotes a sine term.
pub fn noll_to_nm(j: usize) -> Result<(u32, i32), ZernikeError> {
    if j == 0 {
        return Err(ZernikeError::InvalidIndex(j));
    }
    let mut n: usize = 0;
    let mut j1 = j - 1;
    while j1 > n {
        n += 1;
        j1 -= n;
    }
    let magnitude = (n % 2 + 2 * ((j1 + (n + 1) % 2) / 2)) as i32;
    let m = if j % 2 == 0 { magnitude } else { -magnitude };
    Ok((n as u32, m))
}

fn factorial(k: u32) -> f64 {
    (1..=k).map(f64::from).product()
}

/// One Zernike polynomial.
#[derive(Debug, Clone, PartialEq)]
pub struct ZernikePolynomial {
    /// Noll index
    pub j: usize,
    /// Radial order
    pub n: u32,
    /// Signed azimuthal order (negative for sine terms)
    pub m: i32,
    angular: Angular,
    /// (coefficient including normalization, power of x²+y²)
    radial: Vec<(f64, i32)>,
}

impl ZernikePolynomial {
    pub fn new(j: usize) -> Result<Self, ZernikeError> {
        let (n, m) = noll_to_nm(j)?;
        let abs_m = m.unsigned_abs();
        let angular = match m {
            0 => Angular::Radial,
            m if m > 0 => Angular::Cos,
            _ => Angular::Sin,
        };
        let norm = if m == 0 {
            f64::from(n + 1).sqrt()
        } else {
            (2.0 * f64::from(n + 1)).sqrt()
        };

        let half_sum = (n + abs_m) / 2;
        let half_diff = (n - abs_m) / 2;
        let radial = (0..=half_diff)
            .map(|k| {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                let c = sign * factorial(n - k)
                    / (factorial(k) * factorial(half_sum - k) * factorial(half_diff - k));
                (norm * c, (half_diff - k) as i32)
            })
            .collect();

        Ok(Self {
            j,
            n,
            m,
            angular,
            radial,
        })
    }

    /// Value of the polynomial at (x, y).
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.derivatives(x, y).value
    }

    /// Value, gradient and Hessian at (x, y).
    pub fn derivatives(&self, x: f64, y: f64) -> ZernikeDerivatives {
        let q = x * x + y * y;

        // f = Σ c_k q^p_k and its derivatives
        let (mut f, mut fx, mut fy, mut fxx, mut fxy, mut fyy) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        for &(c, p) in &self.radial {
            let pf = f64::from(p);
            let (qp, qp1, qp2) = match p {
                0 => (1.0, 0.0, 0.0),
                1 => (q, 1.0, 0.0),
                _ => (q.powi(p), q.powi(p - 1), q.powi(p - 2)),
            };
            let d1 = 2.0 * pf * qp1;
            let d2 = 4.0 * pf * (pf - 1.0) * qp2;
            f += c * qp;
            fx += c * d1 * x;
            fy += c * d1 * y;
            fxx += c * (d1 + d2 * x * x);
            fxy += c * d2 * x * y;
            fyy += c * (d1 + d2 * y * y);
        }

        // h = (x + iy)^m and its derivatives
        let m = self.m.unsigned_abs();
        let z = Complex::new(x, y);
        let i = Complex::new(0.0, 1.0);
        let h = z.powu(m);
        let (hx, hy) = if m >= 1 {
            let d = z.powu(m - 1) * f64::from(m);
            (d, i * d)
        } else {
            (Complex::new(0.0, 0.0), Complex::new(0.0, 0.0))
        };
        let (hxx, hxy, hyy) = if m >= 2 {
            let d = z.powu(m - 2) * f64::from(m * (m - 1));
            (d, i * d, -d)
        } else {
            let zero = Complex::new(0.0, 0.0);
            (zero, zero, zero)
        };

        let part = |c: Complex<f64>| match self.angular {
            Angular::Sin => c.im,
            _ => c.re,
        };
        let (g, gx, gy, gxx, gxy, gyy) = (
            part(h),
            part(hx),
            part(hy),
            part(hxx),
            part(hxy),
            part(hyy),
        );

        ZernikeDerivatives {
            value: f * g,
            dx: fx * g + f * gx,
            dy: fy * g + f * gy,
            dxx: fxx * g + 2.0 * fx * gx + f * gxx,
            dxy: fxy * g + fx * gy + fy * gx + f * gxy,
            dyy: fyy * g + 2.0 * fy * gy + f * gyy,
        }
    }
}

/// Noll-ordered set of Zernike polynomials `Z_1 ..= Z_max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ZernikeBasis {
    terms: Vec<ZernikePolynomial>,
}

impl ZernikeBasis {
    /// Build `Z_1 ..= Z_max_j`.
    pub fn new(max_j: usize) -> Result<Self, ZernikeError> {
        if max_j == 0 {
            return Err(ZernikeError::InvalidIndex(max_j));
        }
        let terms = (1..=max_j)
            .map(ZernikePolynomial::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { terms })
    }

    /// Highest Noll index in the basis.
    pub fn max_j(&self) -> usize {
        self.terms.len()
    }

    /// Term with Noll index `j`.
    pub fn term(&self, j: usize) -> Result<&ZernikePolynomial, ZernikeError> {
        if j == 0 {
            return Err(ZernikeError::InvalidIndex(j));
        }
        self.terms.get(j - 1).ok_or(ZernikeError::OutOfRange {
            index: j,
            max: self.terms.len(),
        })
    }

    /// Weighted sum `Σ coefficients[k] Z_{first_j + k}` and its derivatives.
    ///
    /// Coefficients beyond the end of the basis are ignored.
    pub fn sum(&self, first_j: usize, coefficients: &[f64], x: f64, y: f64) -> ZernikeDerivatives {
        let mut total = ZernikeDerivatives::default();
        for (k, &c) in coefficients.iter().enumerate() {
            if c == 0.0 {
                continue;
            }
            if let Some(term) = self.terms.get(first_j + k - 1) {
                total.add_scaled(&term.derivatives(x, y), c);
            }
        }
        total
    }
}
