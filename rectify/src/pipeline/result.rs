//! Rectification result types.

use glam::DVec2;

use crate::error::Result;
use crate::lattice::{self, LatticeFit};
use crate::raster::Raster;
use crate::transform::Affine;

/// One frame resampled into the reference canvas.
#[derive(Debug, Clone)]
pub struct RectifiedFrame {
    /// The frame in reference-frame working coordinates.
    pub image: Raster,

    /// Mark positions found on the working-resolution frame, in lattice order.
    pub detected: Vec<DVec2>,

    /// Lattice fit of this frame; its transform is `frame_from_lattice`.
    pub fit: LatticeFit,

    /// Working-resolution frame to reference working coordinates.
    pub image1_from_frame: Affine,

    /// Full-resolution frame to reference working coordinates.
    pub image1_from_full: Affine,

    /// `seed - image1_from_frame(detected)` per mark.
    pub reference_residuals: Vec<DVec2>,
}

impl RectifiedFrame {
    /// `(rms, max)` distance between the mapped detections and the seeds.
    pub fn reference_error(&self) -> (f64, f64) {
        lattice::residual_stats(&self.reference_residuals)
    }
}

/// What happened to one frame of a sequence.
#[derive(Debug)]
pub struct FrameOutcome {
    pub index: usize,
    pub result: Result<RectifiedFrame>,
}

impl FrameOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn frame(&self) -> Option<&RectifiedFrame> {
        self.result.as_ref().ok()
    }
}
