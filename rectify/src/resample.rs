//! Affine image resampling.
//!
//! [`warp`] takes a transform in the forward ("push") direction: it maps source
//! coordinates to destination coordinates. Resampling itself runs in the pull
//! direction (each destination pixel looks up where it came from), so the
//! transform is inverted once up front and callers only ever reason about
//! where a source point lands.
//!
//! Pixel `(x, y)` sits at integer coordinate `(x, y)`. Bilinear interpolation
//! is defined on `[0, w-1] x [0, h-1]`; anything outside reads as zero.

use common::parallel::par_rows_mut;
use common::Buffer2;
use glam::DVec2;

use crate::error::{RectifyError, Result};
use crate::raster::Raster;
use crate::transform::Affine;


/// Value of destination pixels whose source coordinate falls outside the source grid.
pub const FILL_VALUE: f32 = 0.0;

/// Resample `source` through the forward transform `dest_from_source`.
///
/// Each destination pixel `p` takes the bilinear sample of `source` at
/// `dest_from_source⁻¹ · p`. `output_size` is `(width, height)` and defaults to
/// the source size.
///
/// Fails with [`RectifyError::DegenerateTransform`] if the transform has no inverse.
pub fn warp(
    source: &Raster,
    dest_from_source: &Affine,
    output_size: Option<(usize, usize)>,
) -> Result<Raster> {
    let source_from_dest = dest_from_source.inverse()?;
    let (width, height) = output_size.unwrap_or(source.size());

    let mut output: Raster = Buffer2::new_default(width, height);
    if width == 0 || height == 0 {
        return Ok(output);
    }

    par_rows_mut(output.pixels_mut(), width, |y, row| {
        warp_row(source, row, y, &source_from_dest);
    });

    tracing::debug!(
        src_width = source.width(),
        src_height = source.height(),
        width,
        height,
        "warped raster"
    );

    Ok(output)
}

/// Fill one destination row.
///
/// Affine maps are linear along a row, so the source coordinate advances by a
/// constant step per destination pixel instead of a full matrix multiply.
fn warp_row(source: &Raster, output_row: &mut [f32], output_y: usize, source_from_dest: &Affine) {
    let [a, _, _, c, _, _] = source_from_dest.params();
    let start = source_from_dest.apply(DVec2::new(0.0, output_y as f64));

    for (x, out) in output_row.iter_mut().enumerate() {
        let sx = start.x + a * x as f64;
        let sy = start.y + c * x as f64;
        *out = bilinear_sample(source, sx, sy);
    }
}

/// Bilinear sample at `(x, y)`, or [`FILL_VALUE`] outside the sample grid.
#[inline]
pub fn bilinear_sample(source: &Raster, x: f64, y: f64) -> f32 {
    let width = source.width();
    let height = source.height();
    if width == 0 || height == 0 {
        return FILL_VALUE;
    }

    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    // Written so NaN coordinates also land in the fill branch.
    if !(x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y) {
        return FILL_VALUE;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let p00 = *source.get(x0, y0);
    let p10 = *source.get(x1, y0);
    let p01 = *source.get(x0, y1);
    let p11 = *source.get(x1, y1);

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}

/// Uniform scale mapping a `width x height` image onto one `target_width` wide.
///
/// This is the `working_from_full` transform of a raw frame.
pub fn scale_to_width(width: usize, height: usize, target_width: usize) -> Result<Affine> {
    if width == 0 || height == 0 || target_width == 0 {
        return Err(RectifyError::DegenerateTransform { determinant: 0.0 });
    }
    let s = target_width as f64 / width as f64;
    Ok(Affine::scale(s, s))
}

/// `(width, height)` of a `width x height` image scaled to `target_width`,
/// with the height truncated to whole pixels.
pub fn working_size(width: usize, height: usize, target_width: usize) -> (usize, usize) {
    if width == 0 {
        return (target_width, 0);
    }
    let scaled_height = target_width as f64 / width as f64 * height as f64;
    (target_width, scaled_height as usize)
}

/// Resample a raw raster to the working resolution.
///
/// Returns the working raster and the `working_from_full` transform used to
/// produce it.
pub fn normalize_to_width(source: &Raster, target_width: usize) -> Result<(Raster, Affine)> {
    let working_from_full = scale_to_width(source.width(), source.height(), target_width)?;
    let size = working_size(source.width(), source.height(), target_width);
    let working = warp(source, &working_from_full, Some(size))?;
    Ok((working, working_from_full))
}
