//! Frame sources for sequence processing.

use crate::error::{RectifyError, Result};
use crate::raster::Raster;

/// An indexed sequence of full-resolution frames.
///
/// Frames are requested by index, possibly from several threads at once, and
/// each one is dropped as soon as it has been rectified.
pub trait FrameSource: Sync {
    fn len(&self) -> usize;

    /// Produce frame `index`. Failures should be [`RectifyError::FrameLoad`].
    fn load(&self, index: usize) -> Result<Raster>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSource for [Raster] {
    fn len(&self) -> usize {
        <[Raster]>::len(self)
    }

    fn load(&self, index: usize) -> Result<Raster> {
        self.get(index).cloned().ok_or_else(|| RectifyError::FrameLoad {
            index,
            reason: format!("sequence has only {} frames", <[Raster]>::len(self)),
        })
    }
}

impl FrameSource for Vec<Raster> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn load(&self, index: usize) -> Result<Raster> {
        FrameSource::load(self.as_slice(), index)
    }
}

/// Frames produced on demand by a loader function, e.g. decoding files.
pub struct LazyFrames<F> {
    len: usize,
    loader: F,
}

impl<F> LazyFrames<F>
where
    F: Fn(usize) -> Result<Raster> + Sync,
{
    pub fn new(len: usize, loader: F) -> Self {
        Self { len, loader }
    }
}

impl<F> FrameSource for LazyFrames<F>
where
    F: Fn(usize) -> Result<Raster> + Sync,
{
    fn len(&self) -> usize {
        self.len
    }

    fn load(&self, index: usize) -> Result<Raster> {
        (self.loader)(index)
    }
}

impl<F> std::fmt::Debug for LazyFrames<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFrames").field("len", &self.len).finish()
    }
}
