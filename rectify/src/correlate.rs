//! Zero-mean cross-correlation template matching.
//!
//! The correlation surface is computed in the frequency domain:
//! 1. Subtract the mean from window and template
//! 2. Zero-pad both to a power-of-two square large enough that no lag wraps around
//! 3. Multiply the window spectrum by the conjugate template spectrum
//! 4. Inverse transform and re-centre so lag (0, 0) sits at `(h/2, w/2)`
//!
//! The result matches a spatial "same"-size convolution of the window with the
//! reversed template.

use std::sync::Arc;

use common::Buffer2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::raster::{self, Raster};


/// Integer displacement of a template inside a window, in pixels.
///
/// Positive `row` means the pattern sits lower in the window than in the
/// template, positive `col` means it sits further right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub row: i64,
    pub col: i64,
}

/// Cross-correlator planned for one window size.
///
/// Planning happens once; the correlator is then shared read-only between
/// threads.
pub struct CrossCorrelator {
    width: usize,
    height: usize,
    /// Side of the zero-padded square FFT buffer
    fft_size: usize,
    forward_fft: Arc<dyn Fft<f64>>,
    inverse_fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for CrossCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossCorrelator")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fft_size", &self.fft_size)
            .finish()
    }
}

impl CrossCorrelator {
    /// Plan correlation of `width x height` windows against same-size templates.
    ///
    /// # Panics
    /// Panics if either dimension is 0.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(
            width > 0 && height > 0,
            "correlation window must be non-empty"
        );

        // Lags span at most one window size in each direction.
        let fft_size = (2 * width.max(height)).next_power_of_two();

        let mut planner = FftPlanner::new();
        let forward_fft = planner.plan_fft_forward(fft_size);
        let inverse_fft = planner.plan_fft_inverse(fft_size);

        Self {
            width,
            height,
            fft_size,
            forward_fft,
            inverse_fft,
        }
    }

    /// `(width, height)` of the windows this correlator accepts.
    pub fn window_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Zero-mean cross-correlation surface of `window` against `template`.
    ///
    /// The surface has the window's size. Element `(col, row)` holds
    /// `Σ window[p] · template[p - lag]` (both mean-subtracted) for
    /// `lag = (row - h/2, col - w/2)`.
    ///
    /// # Panics
    /// Panics if `window` or `template` does not have the planned size.
    pub fn cross_image(&self, window: &Raster, template: &Raster) -> Buffer2<f64> {
        self.check_size(window, "window");
        self.check_size(template, "template");

        let window_spectrum = self.spectrum(window);
        let template_spectrum = self.spectrum(template);

        let mut product: Vec<Complex<f64>> = window_spectrum
            .iter()
            .zip(template_spectrum.iter())
            .map(|(&a, &b)| a * b.conj())
            .collect();
        self.ifft_2d(&mut product);

        let n = self.fft_size;
        let norm = 1.0 / (n * n) as f64;
        let half_w = (self.width / 2) as i64;
        let half_h = (self.height / 2) as i64;

        Buffer2::from_fn(self.width, self.height, |col, row| {
            let lag_row = (row as i64 - half_h).rem_euclid(n as i64) as usize;
            let lag_col = (col as i64 - half_w).rem_euclid(n as i64) as usize;
            product[lag_row * n + lag_col].re * norm
        })
    }

    /// Offset of the surface maximum from the surface centre.
    ///
    /// With `Some(r)` only rows `[h/2 - r, h/2 + r)` and columns
    /// `[w/2 - r, w/2 + r)` are searched (clipped to the surface); `None`
    /// searches the whole surface. Ties resolve to the first maximum in
    /// raster-scan order.
    ///
    /// # Panics
    /// Panics if the surface or the search region is empty.
    pub fn peak_offset(surface: &Buffer2<f64>, search_radius: Option<usize>) -> Offset {
        let (width, height) = surface.size();
        let center_col = width / 2;
        let center_row = height / 2;

        let (rows, cols) = match search_radius {
            Some(r) => (
                center_row.saturating_sub(r)..(center_row + r).min(height),
                center_col.saturating_sub(r)..(center_col + r).min(width),
            ),
            None => (0..height, 0..width),
        };
        assert!(
            !rows.is_empty() && !cols.is_empty(),
            "peak search region is empty"
        );

        let mut best = f64::NEG_INFINITY;
        let mut best_row = rows.start;
        let mut best_col = cols.start;
        for row in rows {
            for col in cols.clone() {
                let value = surface[(col, row)];
                if value > best {
                    best = value;
                    best_row = row;
                    best_col = col;
                }
            }
        }

        Offset {
            row: best_row as i64 - center_row as i64,
            col: best_col as i64 - center_col as i64,
        }
    }

    /// Integer offset of `template` inside `window`, searched within `search_radius`.
    ///
    /// # Panics
    /// Same preconditions as [`Self::cross_image`].
    pub fn offset(&self, window: &Raster, template: &Raster, search_radius: Option<usize>) -> Offset {
        let surface = self.cross_image(window, template);
        Self::peak_offset(&surface, search_radius)
    }

    fn check_size(&self, raster: &Raster, what: &str) {
        assert_eq!(
            raster.size(),
            (self.width, self.height),
            "{what} size does not match the planned correlation size"
        );
    }

    /// Mean-subtract, zero-pad and forward-transform a raster.
    fn spectrum(&self, raster: &Raster) -> Vec<Complex<f64>> {
        let n = self.fft_size;
        let mean = raster::mean(raster);

        let mut data = vec![Complex::new(0.0, 0.0); n * n];
        for y in 0..raster.height() {
            let dst = &mut data[y * n..y * n + raster.width()];
            for (d, &v) in dst.iter_mut().zip(raster.row(y)) {
                *d = Complex::new(v as f64 - mean, 0.0);
            }
        }

        self.fft_2d(&mut data);
        data
    }

    /// 2D FFT by row-column decomposition.
    fn fft_2d(&self, data: &mut [Complex<f64>]) {
        let n = self.fft_size;
        self.forward_fft.process(data);
        transpose_inplace(data, n);
        self.forward_fft.process(data);
        transpose_inplace(data, n);
    }

    /// Unnormalized inverse 2D FFT.
    fn ifft_2d(&self, data: &mut [Complex<f64>]) {
        let n = self.fft_size;
        self.inverse_fft.process(data);
        transpose_inplace(data, n);
        self.inverse_fft.process(data);
        transpose_inplace(data, n);
    }
}

/// Transpose a square `n x n` matrix in place.
fn transpose_inplace(data: &mut [Complex<f64>], n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            data.swap(i * n + j, j * n + i);
        }
    }
}
