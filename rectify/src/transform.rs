//! Affine transforms between named coordinate frames.

use std::ops::Mul;

use glam::DVec2;

use crate::error::{RectifyError, Result};


/// Determinants below this magnitude are treated as singular.
///
/// Appropriate for pixel- and lattice-scale coordinates (values up to ~1e4).
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// 2D affine transform as a 3x3 homogeneous matrix with bottom row `[0, 0, 1]`.
///
/// Only the top two rows are stored, so the bottom row is fixed by construction:
/// ```text
/// | a  b  tx |   | m[0] m[1] m[2] |
/// | c  d  ty | = | m[3] m[4] m[5] |
/// | 0  0  1  |   |  0    0    1   |
/// ```
///
/// Transforms are named `to_from`: `image1_from_lattice.apply(p)` takes a point
/// `p` in lattice coordinates and returns the matching point in image 1. Composing
/// `c_from_b.compose(&b_from_a)` gives `c_from_a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    m: [f64; 6],
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for Affine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.m;
        write!(
            f,
            "[[{:.6}, {:.6}, {:.3}], [{:.6}, {:.6}, {:.3}], [0, 0, 1]]",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl Affine {
    pub const fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    /// Create from the six free parameters `[a, b, tx, c, d, ty]`.
    pub const fn from_params(m: [f64; 6]) -> Self {
        Self { m }
    }

    /// Create from the top two rows of the homogeneous matrix.
    pub const fn from_rows(row0: [f64; 3], row1: [f64; 3]) -> Self {
        Self {
            m: [row0[0], row0[1], row0[2], row1[0], row1[1], row1[2]],
        }
    }

    pub fn translation(t: DVec2) -> Self {
        Self::from_params([1.0, 0.0, t.x, 0.0, 1.0, t.y])
    }

    /// Axis-aligned scale about the origin.
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_params([sx, 0.0, 0.0, 0.0, sy, 0.0])
    }

    /// Rotation by `angle` radians about `center`.
    pub fn rotation_around(center: DVec2, angle: f64) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        let tx = center.x - cos_a * center.x + sin_a * center.y;
        let ty = center.y - sin_a * center.x - cos_a * center.y;
        Self::from_params([cos_a, -sin_a, tx, sin_a, cos_a, ty])
    }

    /// The six free parameters `[a, b, tx, c, d, ty]`.
    #[inline]
    pub const fn params(&self) -> [f64; 6] {
        self.m
    }

    /// Full 3x3 homogeneous matrix, row-major.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        let m = &self.m;
        [[m[0], m[1], m[2]], [m[3], m[4], m[5]], [0.0, 0.0, 1.0]]
    }

    #[inline]
    pub fn translation_components(&self) -> DVec2 {
        DVec2::new(self.m[2], self.m[5])
    }

    /// Determinant of the homogeneous matrix (equal to that of the linear part).
    #[inline]
    pub fn determinant(&self) -> f64 {
        self.m[0] * self.m[4] - self.m[1] * self.m[3]
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() >= SINGULAR_DETERMINANT
    }

    /// Map a point from the `from` frame into the `to` frame.
    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let m = &self.m;
        DVec2::new(
            m[0] * p.x + m[1] * p.y + m[2],
            m[3] * p.x + m[4] * p.y + m[5],
        )
    }

    /// Inverse transform (`from_to` for a `to_from` transform).
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        if !self.is_invertible() {
            return Err(RectifyError::DegenerateTransform { determinant: det });
        }
        let inv_det = 1.0 / det;
        let [a, b, tx, c, d, ty] = self.m;
        let ia = d * inv_det;
        let ib = -b * inv_det;
        let ic = -c * inv_det;
        let id = a * inv_det;
        Ok(Self::from_params([
            ia,
            ib,
            -(ia * tx + ib * ty),
            ic,
            id,
            -(ic * tx + id * ty),
        ]))
    }

    /// Matrix product `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let a = &self.m;
        let b = &other.m;
        Self::from_params([
            a[0] * b[0] + a[1] * b[3],
            a[0] * b[1] + a[1] * b[4],
            a[0] * b[2] + a[1] * b[5] + a[2],
            a[3] * b[0] + a[4] * b[3],
            a[3] * b[1] + a[4] * b[4],
            a[3] * b[2] + a[4] * b[5] + a[5],
        ])
    }

    /// Largest absolute difference between corresponding matrix entries.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.m
            .iter()
            .zip(other.m.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Mul for Affine {
    type Output = Affine;

    #[inline]
    fn mul(self, rhs: Affine) -> Affine {
        self.compose(&rhs)
    }
}

impl Mul<DVec2> for Affine {
    type Output = DVec2;

    #[inline]
    fn mul(self, rhs: DVec2) -> DVec2 {
        self.apply(rhs)
    }
}
