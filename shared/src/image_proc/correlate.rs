//! FFT cross-correlation of images with a kernel.
//!
//! Output has the same shape as the input image and follows the `same`
//! alignment convention:
//!
//! ```text
//! out[r, c] = Σ_{i,j} image[r + i - kh/2, c + j - kw/2] · kernel[i, j]
//! ```
//!
//! with out-of-range image pixels treated as zero. A kernel pasted into an
//! image with its top-left corner at `(r0, c0)` therefore correlates most
//! strongly at `(r0 + kh/2, c0 + kw/2)`.
//!
//! Both arrays are zero-padded to a 5-smooth size of at least
//! `image + kernel - 1` along each axis so the circular FFT result contains
//! no wrap-around.

use ndarray::{Array2, ArrayView2, Axis};
use rustfft::{num_complex::Complex64, FftPlanner};
use thiserror::Error;

use crate::image_proc::image::Image;

/// Errors from correlation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CorrelationError {
    #[error("correlation kernel is empty")]
    EmptyKernel,

    #[error("correlation image is empty")]
    EmptyImage,
}

/// Smallest `n' >= n` whose only prime factors are 2, 3 and 5.
pub fn next_fast_len(n: usize) -> usize {
    let mut candidate = n.max(1);
    loop {
        let mut rest = candidate;
        for p in [2, 3, 5] {
            while rest % p == 0 {
                rest /= p;
            }
        }
        if rest == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

/// In-place 2D FFT over rows then columns.
pub(crate) fn fft2(data: &mut Array2<Complex64>, planner: &mut FftPlanner<f64>, inverse: bool) {
    let (rows, cols) = data.dim();
    let row_fft = if inverse {
        planner.plan_fft_inverse(cols)
    } else {
        planner.plan_fft_forward(cols)
    };
    let col_fft = if inverse {
        planner.plan_fft_inverse(rows)
    } else {
        planner.plan_fft_forward(rows)
    };

    let mut buffer = vec![Complex64::new(0.0, 0.0); cols];
    for mut row in data.axis_iter_mut(Axis(0)) {
        for (b, v) in buffer.iter_mut().zip(row.iter()) {
            *b = *v;
        }
        row_fft.process(&mut buffer);
        for (v, b) in row.iter_mut().zip(buffer.iter()) {
            *v = *b;
        }
    }

    let mut buffer = vec![Complex64::new(0.0, 0.0); rows];
    for mut col in data.axis_iter_mut(Axis(1)) {
        for (b, v) in buffer.iter_mut().zip(col.iter()) {
            *b = *v;
        }
        col_fft.process(&mut buffer);
        for (v, b) in col.iter_mut().zip(buffer.iter()) {
            *v = *b;
        }
    }
}

fn padded_spectrum(
    data: &ArrayView2<f64>,
    shape: (usize, usize),
    planner: &mut FftPlanner<f64>,
) -> Array2<Complex64> {
    let mut padded = Array2::from_elem(shape, Complex64::new(0.0, 0.0));
    for ((r, c), &v) in data.indexed_iter() {
        padded[[r, c]] = Complex64::new(v, 0.0);
    }
    fft2(&mut padded, planner, false);
    padded
}

/// Precomputed kernel spectrum for correlating several arrays of one shape.
struct KernelSpectrum {
    conj_spectrum: Array2<Complex64>,
    kernel_dim: (usize, usize),
}

impl KernelSpectrum {
    fn new(
        kernel: &ArrayView2<f64>,
        shape: (usize, usize),
        planner: &mut FftPlanner<f64>,
    ) -> Self {
        let conj_spectrum = padded_spectrum(kernel, shape, planner).mapv(|c| c.conj());
        Self {
            conj_spectrum,
            kernel_dim: kernel.dim(),
        }
    }

    fn correlate(&self, image: &ArrayView2<f64>, planner: &mut FftPlanner<f64>) -> Array2<f64> {
        let shape = self.conj_spectrum.dim();
        let mut product = padded_spectrum(image, shape, planner);
        product *= &self.conj_spectrum;
        fft2(&mut product, planner, true);

        let (rows, cols) = image.dim();
        let (pr, pc) = shape;
        let (kr, kc) = (self.kernel_dim.0 / 2, self.kernel_dim.1 / 2);
        let scale = 1.0 / (pr * pc) as f64;

        // Circular correlation lag (r - kr) lives at index (r - kr) mod pr
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let lr = (r + pr - kr) % pr;
            let lc = (c + pc - kc) % pc;
            product[[lr, lc]].re * scale
        })
    }
}

fn padded_shape(image: (usize, usize), kernel: (usize, usize)) -> (usize, usize) {
    (
        next_fast_len(image.0 + kernel.0 - 1),
        next_fast_len(image.1 + kernel.1 - 1),
    )
}

/// Cross-correlate `image` with `kernel`, `same`-size output.
pub fn correlate(
    image: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
) -> Result<Array2<f64>, CorrelationError> {
    if kernel.is_empty() {
        return Err(CorrelationError::EmptyKernel);
    }
    if image.is_empty() {
        return Err(CorrelationError::EmptyImage);
    }

    let mut planner = FftPlanner::new();
    let shape = padded_shape(image.dim(), kernel.dim());
    let spectrum = KernelSpectrum::new(kernel, shape, &mut planner);
    Ok(spectrum.correlate(image, &mut planner))
}

/// Correlate the image plane and, if present, the variance plane of `image`
/// with `kernel`. The planes are correlated independently.
pub fn correlate_image(image: &Image, kernel: &Image) -> Result<Image, CorrelationError> {
    if kernel.data().is_empty() {
        return Err(CorrelationError::EmptyKernel);
    }
    if image.data().is_empty() {
        return Err(CorrelationError::EmptyImage);
    }

    let start = std::time::Instant::now();
    let mut planner = FftPlanner::new();
    let shape = padded_shape(image.data().dim(), kernel.data().dim());
    let spectrum = KernelSpectrum::new(&kernel.view(), shape, &mut planner);

    let data = spectrum.correlate(&image.view(), &mut planner);
    let variance = image
        .variance()
        .map(|v| spectrum.correlate(&v.view(), &mut planner));

    log::debug!(
        "correlated {} image with {} kernel on {}x{} grid in {:.1} ms",
        image.shape(),
        kernel.shape(),
        shape.1,
        shape.0,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(image.derive(data, variance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::s;

    fn direct_same(image: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
        let (rows, cols) = image.dim();
        let (kr, kc) = kernel.dim();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let mut sum = 0.0;
            for i in 0..kr {
                for j in 0..kc {
                    let rr = r as isize + i as isize - (kr / 2) as isize;
                    let cc = c as isize + j as isize - (kc / 2) as isize;
                    if rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols {
                        sum += image[[rr as usize, cc as usize]] * kernel[[i, j]];
                    }
                }
            }
            sum
        })
    }

    #[test]
    fn test_next_fast_len() {
        assert_eq!(next_fast_len(1), 1);
        assert_eq!(next_fast_len(7), 8);
        assert_eq!(next_fast_len(1159), 1200);
        assert_eq!(next_fast_len(121), 125);
    }

    #[test]
    fn test_matches_direct_correlation_odd_and_even_kernels() {
        let image = Array2::from_shape_fn((13, 17), |(r, c)| ((r * 7 + c * 3) % 11) as f64 - 4.0);
        for kernel_dim in [(3, 3), (4, 6), (5, 2)] {
            let kernel = Array2::from_shape_fn(kernel_dim, |(r, c)| (r as f64 + 1.0) * (c as f64 - 0.5));
            let fft = correlate(&image.view(), &kernel.view()).unwrap();
            let direct = direct_same(&image, &kernel);
            for (a, b) in fft.iter().zip(direct.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_pasted_kernel_peaks_at_stamp_center() {
        let mut kernel = Array2::zeros((10, 10));
        kernel.slice_mut(s![2..8, 3..7]).fill(1.0);
        let mut image = Array2::zeros((50, 60));
        image.slice_mut(s![20..30, 31..41]).assign(&kernel);

        let out = correlate(&image.view(), &kernel.view()).unwrap();
        let (mut best, mut best_val) = ((0, 0), f64::MIN);
        for ((r, c), &v) in out.indexed_iter() {
            if v > best_val {
                best_val = v;
                best = (r, c);
            }
        }
        assert_eq!(best, (25, 36));
        assert_abs_diff_eq!(best_val, 24.0, epsilon = 1e-9);
    }

    #[test]
    fn test_variance_plane_correlated_separately() {
        let data = Array2::from_elem((8, 8), 1.0);
        let variance = Array2::from_elem((8, 8), 2.0);
        let image = Image::new(data).with_variance(variance).unwrap();
        let kernel = Image::new(Array2::ones((1, 1)));
        let out = correlate_image(&image, &kernel).unwrap();
        assert_abs_diff_eq!(out.data()[[3, 3]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.variance().unwrap()[[3, 3]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_kernel_rejected() {
        let image = Array2::<f64>::zeros((4, 4));
        let kernel = Array2::<f64>::zeros((0, 3));
        assert_eq!(
            correlate(&image.view(), &kernel.view()),
            Err(CorrelationError::EmptyKernel)
        );
    }
}
