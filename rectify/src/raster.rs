//! Single-channel raster helpers.

use common::Buffer2;
use glam::DVec2;

/// Single-channel intensity raster with samples in the 8-bit range `0.0..=255.0`.
///
/// Every pipeline stage returns a new raster; none mutates its input.
pub type Raster = Buffer2<f32>;

/// Full-scale intensity of an 8-bit sample.
pub const MAX_INTENSITY: f32 = 255.0;

/// Build a raster from 8-bit samples in row-major order.
///
/// # Panics
/// Panics if `samples.len() != width * height`.
pub fn from_u8(width: usize, height: usize, samples: &[u8]) -> Raster {
    Buffer2::new(width, height, samples.iter().map(|&v| v as f32).collect())
}

/// Export a raster as 8-bit samples, rounding and clamping to `0..=255`.
pub fn to_u8(raster: &Raster) -> Vec<u8> {
    raster
        .iter()
        .map(|&v| v.round().clamp(0.0, MAX_INTENSITY) as u8)
        .collect()
}

/// Intensity-inverted copy: every sample `v` becomes `max - v`.
pub fn invert(raster: &Raster, max: f32) -> Raster {
    raster.map(|&v| max - v)
}

/// Arithmetic mean of all samples (0 for an empty raster).
pub fn mean(raster: &Raster) -> f64 {
    if raster.is_empty() {
        return 0.0;
    }
    raster.iter().map(|&v| v as f64).sum::<f64>() / raster.len() as f64
}

/// Square window of side `2 * radius` around `center`.
///
/// The window covers source columns `[cx - radius, cx + radius)` and rows
/// `[cy - radius, cy + radius)` with `(cx, cy) = floor(center)`, so the center
/// pixel lands at window position `(radius, radius)`. Parts of the window
/// outside the source read as zero, as does the whole window when `center`
/// is not finite.
pub fn crop_window(source: &Raster, center: DVec2, radius: usize) -> Raster {
    let side = 2 * radius;
    let origin = center.floor() - DVec2::splat(radius as f64);
    // NaN fails both comparisons.
    let overlaps = |start: f64, extent: usize| start > -(side as f64) && start < extent as f64;
    if !overlaps(origin.x, source.width()) || !overlaps(origin.y, source.height()) {
        return Buffer2::new_filled(side, side, 0.0);
    }

    let x0 = origin.x as i64;
    let y0 = origin.y as i64;
    let width = source.width() as i64;
    let height = source.height() as i64;

    Buffer2::from_fn(side, side, |wx, wy| {
        let sx = x0 + wx as i64;
        let sy = y0 + wy as i64;
        if sx < 0 || sy < 0 || sx >= width || sy >= height {
            0.0
        } else {
            *source.get(sx as usize, sy as usize)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_conversion_rounds_and_clamps() {
        let raster = Buffer2::new(4, 1, vec![-3.0, 12.4, 12.6, 300.0]);
        assert_eq!(to_u8(&raster), vec![0, 12, 13, 255]);

        let back = from_u8(2, 2, &[0, 10, 200, 255]);
        assert_eq!(back.pixels(), &[0.0, 10.0, 200.0, 255.0]);
    }

    #[test]
    fn test_invert() {
        let raster = from_u8(3, 1, &[0, 55, 255]);
        let inverted = invert(&raster, MAX_INTENSITY);
        assert_eq!(inverted.pixels(), &[255.0, 200.0, 0.0]);
        // The input is untouched.
        assert_eq!(raster.pixels(), &[0.0, 55.0, 255.0]);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&from_u8(2, 2, &[0, 10, 20, 30])), 15.0);
        assert_eq!(mean(&Buffer2::new(0, 0, vec![])), 0.0);
    }

    #[test]
    fn test_crop_window_places_center_at_radius() {
        let source = Buffer2::from_fn(20, 20, |x, y| (y * 100 + x) as f32);
        let window = crop_window(&source, DVec2::new(10.7, 5.2), 3);

        assert_eq!(window.size(), (6, 6));
        // floor(center) = (10, 5) lands at (3, 3)
        assert_eq!(window[(3, 3)], 510.0);
        assert_eq!(window[(0, 0)], 207.0);
        assert_eq!(window[(5, 5)], 712.0);
    }

    #[test]
    fn test_crop_window_fills_outside_with_zero() {
        let source = Buffer2::new_filled(8, 8, 9.0f32);
        let window = crop_window(&source, DVec2::new(1.0, 7.0), 3);

        // Source columns -2..4, rows 4..10
        for wy in 0..6 {
            for wx in 0..6 {
                let inside = wx >= 2 && wy < 4;
                let expected = if inside { 9.0 } else { 0.0 };
                assert_eq!(window[(wx, wy)], expected, "window ({wx}, {wy})");
            }
        }
    }

    #[test]
    fn test_crop_window_entirely_outside_is_blank() {
        let source = Buffer2::new_filled(8, 8, 9.0f32);
        let window = crop_window(&source, DVec2::new(-50.0, -50.0), 4);
        assert!(window.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_crop_window_far_or_non_finite_center_is_blank() {
        let source = Buffer2::new_filled(8, 8, 9.0f32);
        for center in [
            DVec2::new(1e30, 10.0),
            DVec2::new(4.0, -1e30),
            DVec2::new(f64::INFINITY, 4.0),
            DVec2::new(4.0, f64::NEG_INFINITY),
            DVec2::new(f64::NAN, 4.0),
        ] {
            let window = crop_window(&source, center, 4);
            assert_eq!(window.size(), (8, 8));
            assert!(window.iter().all(|&v| v == 0.0), "center {center}");
        }
    }

    #[test]
    fn test_crop_window_touching_source_corner() {
        let source = Buffer2::from_fn(8, 8, |x, y| (y * 10 + x) as f32);
        // Source columns -5..1, rows 7..13: only pixel (0, 7) is inside.
        let window = crop_window(&source, DVec2::new(-2.0, 10.0), 3);
        assert_eq!(window[(5, 0)], 70.0);
        assert_eq!(window.iter().filter(|&&v| v != 0.0).count(), 1);
    }
}
