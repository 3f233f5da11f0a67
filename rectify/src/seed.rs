//! Source of approximate mark positions on the reference frame.
//!
//! Seeds normally come from a person clicking each reticle mark on the first
//! frame, or from a calibration table that recorded those clicks. The
//! pipeline only needs one point per lattice point, in lattice order.

use glam::DVec2;

use crate::config::ChannelCalibration;
use crate::error::{RectifyError, Result};
use crate::lattice::Lattice;
use crate::raster::Raster;

/// Supplies seed points in working-resolution pixel coordinates of the
/// reference frame.
pub trait SeedProvider {
    /// One point per lattice point, ordered as [`Lattice::coordinate`].
    fn seed_points(&self, reference: &Raster, lattice: &Lattice) -> Result<Vec<DVec2>>;
}

/// Fixed, precomputed seed points.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSeeds(pub Vec<DVec2>);

impl SeedProvider for StaticSeeds {
    fn seed_points(&self, _reference: &Raster, _lattice: &Lattice) -> Result<Vec<DVec2>> {
        Ok(self.0.clone())
    }
}

impl SeedProvider for ChannelCalibration {
    /// Seeds recorded in the calibration; a calibration without seeds cannot
    /// provide them.
    fn seed_points(&self, _reference: &Raster, _lattice: &Lattice) -> Result<Vec<DVec2>> {
        self.seeds.clone().ok_or_else(|| {
            RectifyError::Configuration("calibration has no recorded seed points".into())
        })
    }
}

impl<F> SeedProvider for F
where
    F: Fn(&Raster, &Lattice) -> Result<Vec<DVec2>>,
{
    fn seed_points(&self, reference: &Raster, lattice: &Lattice) -> Result<Vec<DVec2>> {
        self(reference, lattice)
    }
}
