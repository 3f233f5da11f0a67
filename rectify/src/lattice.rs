//! Integer reticle lattice and the lattice-to-image affine fit.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::{RectifyError, Result};
use crate::template::MarkDescriptor;
use crate::transform::Affine;


/// Relative tolerance on the Gram determinant below which the lattice
/// points are treated as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-12;

/// Integer grid of reticle marks.
///
/// Point `i` sits at grid position `(ix, iy)` with `i = iy * row_width + ix`
/// and has lattice coordinate `(x_indices[ix], y_indices[iy])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lattice {
    pub x_indices: Vec<i32>,
    pub y_indices: Vec<i32>,
}

impl Lattice {
    pub fn new(x_indices: Vec<i32>, y_indices: Vec<i32>) -> Self {
        Self {
            x_indices,
            y_indices,
        }
    }

    /// Number of points per lattice row.
    #[inline]
    pub fn row_width(&self) -> usize {
        self.x_indices.len()
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.y_indices.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.row_width() * self.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of grid position `(ix, iy)`.
    #[inline]
    pub fn index(&self, ix: usize, iy: usize) -> usize {
        iy * self.row_width() + ix
    }

    /// Grid position `(ix, iy)` of point `i`.
    #[inline]
    pub fn grid_position(&self, i: usize) -> (usize, usize) {
        (i % self.row_width(), i / self.row_width())
    }

    /// Lattice coordinate of point `i`.
    pub fn coordinate(&self, i: usize) -> DVec2 {
        let (ix, iy) = self.grid_position(i);
        DVec2::new(self.x_indices[ix] as f64, self.y_indices[iy] as f64)
    }

    /// Lattice coordinates of all points, in index order.
    pub fn coordinates(&self) -> Vec<DVec2> {
        (0..self.len()).map(|i| self.coordinate(i)).collect()
    }

    /// One mark per point, with arms pointing off the grid removed.
    pub fn default_marks(&self) -> Vec<MarkDescriptor> {
        (0..self.len())
            .map(|i| {
                let (ix, iy) = self.grid_position(i);
                MarkDescriptor::from_lattice_position(ix, iy, self.row_width(), self.rows())
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(RectifyError::Configuration(
                "lattice needs at least one x index and one y index".into(),
            ));
        }
        if has_duplicates(&self.x_indices) || has_duplicates(&self.y_indices) {
            return Err(RectifyError::Configuration(format!(
                "lattice indices must be distinct (x: {:?}, y: {:?})",
                self.x_indices, self.y_indices
            )));
        }
        Ok(())
    }
}

fn has_duplicates(values: &[i32]) -> bool {
    values
        .iter()
        .enumerate()
        .any(|(i, v)| values[i + 1..].contains(v))
}

/// Least-squares lattice-to-image transform and its fit quality.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeFit {
    /// `image_from_lattice`.
    pub transform: Affine,
    /// `image_point - transform(lattice_point)` per point.
    pub residuals: Vec<DVec2>,
    pub rms_error: f64,
    pub max_error: f64,
}

/// Fit the affine transform mapping `lattice_points` onto `image_points`.
///
/// Minimizes `Σ |A·l_i - p_i|²` over the six affine parameters. The x and y
/// image coordinates are two independent linear problems sharing one
/// normal-equation matrix, solved in closed form after centring both point
/// sets.
///
/// Fails with [`RectifyError::InsufficientData`] for fewer than 3 points or
/// lattice points that are collinear (duplicates included), and with
/// [`RectifyError::Configuration`] if the slices differ in length.
pub fn fit_lattice_transform(lattice_points: &[DVec2], image_points: &[DVec2]) -> Result<LatticeFit> {
    if lattice_points.len() != image_points.len() {
        return Err(RectifyError::Configuration(format!(
            "{} lattice points but {} image points",
            lattice_points.len(),
            image_points.len()
        )));
    }

    let n = lattice_points.len();
    if n < 3 {
        return Err(RectifyError::InsufficientData {
            points: n,
            reason: "an affine fit needs at least 3 points",
        });
    }

    let lattice_centroid = centroid(lattice_points);
    let image_centroid = centroid(image_points);

    // Centred sums: Gram matrix [sxx sxy; sxy syy] and cross terms.
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    let mut sx_px = 0.0;
    let mut sy_px = 0.0;
    let mut sx_py = 0.0;
    let mut sy_py = 0.0;

    for (l, p) in lattice_points.iter().zip(image_points.iter()) {
        let l = *l - lattice_centroid;
        let p = *p - image_centroid;
        sxx += l.x * l.x;
        sxy += l.x * l.y;
        syy += l.y * l.y;
        sx_px += l.x * p.x;
        sy_px += l.y * p.x;
        sx_py += l.x * p.y;
        sy_py += l.y * p.y;
    }

    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    if trace <= 0.0 || det <= COLLINEAR_TOLERANCE * trace * trace {
        return Err(RectifyError::InsufficientData {
            points: n,
            reason: "lattice points are collinear",
        });
    }

    let inv_det = 1.0 / det;
    let a = (syy * sx_px - sxy * sy_px) * inv_det;
    let b = (sxx * sy_px - sxy * sx_px) * inv_det;
    let c = (syy * sx_py - sxy * sy_py) * inv_det;
    let d = (sxx * sy_py - sxy * sx_py) * inv_det;

    let tx = image_centroid.x - a * lattice_centroid.x - b * lattice_centroid.y;
    let ty = image_centroid.y - c * lattice_centroid.x - d * lattice_centroid.y;
    let transform = Affine::from_params([a, b, tx, c, d, ty]);

    let residuals = residuals(&transform, lattice_points, image_points);
    let (rms_error, max_error) = residual_stats(&residuals);

    tracing::debug!(points = n, rms_error, max_error, "lattice fit");

    Ok(LatticeFit {
        transform,
        residuals,
        rms_error,
        max_error,
    })
}

/// `target - transform(source)` for each point pair.
pub fn residuals(transform: &Affine, source: &[DVec2], target: &[DVec2]) -> Vec<DVec2> {
    source
        .iter()
        .zip(target.iter())
        .map(|(&s, &t)| t - transform.apply(s))
        .collect()
}

/// `(rms, max)` of residual lengths; `(0, 0)` for none.
pub fn residual_stats(residuals: &[DVec2]) -> (f64, f64) {
    if residuals.is_empty() {
        return (0.0, 0.0);
    }
    let sum_sq: f64 = residuals.iter().map(|r| r.length_squared()).sum();
    let max = residuals.iter().map(|r| r.length()).fold(0.0, f64::max);
    ((sum_sq / residuals.len() as f64).sqrt(), max)
}

fn centroid(points: &[DVec2]) -> DVec2 {
    points.iter().copied().sum::<DVec2>() / points.len() as f64
}
