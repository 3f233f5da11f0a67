//! Reticle-lattice frame rectification.
//!
//! # Pipeline Stages
//!
//! Setup, once per sequence ([`Rectifier::new`]):
//! 1. **Normalize** the reference frame to the working width
//! 2. **Seed** one point per lattice mark from the injected [`SeedProvider`]
//! 3. **Templates** rendered per mark, correlator planned for the window size
//! 4. **Anchor** fit of `image1_from_lattice`, from the seeds or from marks
//!    detected on the reference frame
//!
//! Per frame ([`Rectifier::rectify_frame`]):
//! 1. **Normalize** the frame to the working width
//! 2. **Detect** each mark by correlating an inverted window around its seed
//! 3. **Fit** `frame_from_lattice` to the detected marks
//! 4. **Compose** `image1_from_full = image1_from_lattice · frame_from_lattice⁻¹ · working_from_full`
//! 5. **Warp** the full-resolution frame once into the reference canvas
//!
//! Every frame is registered against the reference lattice directly, so
//! errors do not accumulate along the sequence.

mod result;
mod source;

pub use result::{FrameOutcome, RectifiedFrame};
pub use source::{FrameSource, LazyFrames};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use common::parallel::par_for_each_indexed_limited;
use glam::DVec2;
use rayon::prelude::*;

use crate::config::{ChannelCalibration, Config, ReferenceAnchor};
use crate::correlate::CrossCorrelator;
use crate::error::{RectifyError, Result};
use crate::lattice::{self, Lattice, LatticeFit};
use crate::raster::{self, Raster};
use crate::resample::{normalize_to_width, warp};
use crate::seed::SeedProvider;
use crate::template::render_templates;
use crate::transform::Affine;

#[cfg(test)]
mod tests;

/// Registers frames of one sequence against its reference frame.
///
/// Holds everything computed during setup. It is read-only afterwards and
/// shared between the threads processing individual frames.
#[derive(Debug)]
pub struct Rectifier {
    config: Config,
    lattice: Lattice,
    lattice_points: Vec<DVec2>,
    working_width: usize,
    output_size: (usize, usize),
    seeds: Vec<DVec2>,
    templates: Vec<Raster>,
    correlator: CrossCorrelator,
    reference_fit: LatticeFit,
}

impl Rectifier {
    /// Run setup against the full-resolution reference frame.
    ///
    /// Fails if the calibration is inconsistent, the seed provider fails or
    /// returns the wrong number of points, or the anchor fit is degenerate.
    ///
    /// # Panics
    /// Panics if `config` is invalid (see [`Config::validate`]).
    pub fn new(
        config: Config,
        calibration: &ChannelCalibration,
        reference_full: &Raster,
        seed_provider: &dyn SeedProvider,
    ) -> Result<Self> {
        config.validate();
        calibration.validate()?;

        let start = Instant::now();
        let lattice = calibration.lattice.clone();
        let lattice_points = lattice.coordinates();
        let working_width = calibration.working_width;

        let (reference, _) = normalize_to_width(reference_full, working_width)?;

        let seeds = seed_provider.seed_points(&reference, &lattice)?;
        if seeds.len() != lattice.len() {
            return Err(RectifyError::Configuration(format!(
                "{} seed points for {} lattice points",
                seeds.len(),
                lattice.len()
            )));
        }
        if let Some(index) = seeds.iter().position(|p| !p.is_finite()) {
            return Err(RectifyError::Configuration(format!(
                "seed point {index} is not finite: {}",
                seeds[index]
            )));
        }

        let radius = config.window_radius;
        let templates = render_templates(&calibration.marks, radius);
        let correlator = CrossCorrelator::new(2 * radius, 2 * radius);
        let output_size = config.output_size.unwrap_or((working_width, working_width));

        let anchor_points = match config.reference_anchor {
            ReferenceAnchor::Seeds => seeds.clone(),
            ReferenceAnchor::Detected => {
                detect(&reference, &seeds, &templates, &correlator, &config)
            }
        };
        let reference_fit = lattice::fit_lattice_transform(&lattice_points, &anchor_points)?;
        // Every frame is warped through this transform.
        reference_fit.transform.inverse()?;

        tracing::info!(
            points = lattice.len(),
            working_width,
            anchor = ?config.reference_anchor,
            rms_error = reference_fit.rms_error,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "rectifier ready, image1_from_lattice = {}",
            reference_fit.transform
        );

        Ok(Self {
            config,
            lattice,
            lattice_points,
            working_width,
            output_size,
            seeds,
            templates,
            correlator,
            reference_fit,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Seed points on the working-resolution reference frame.
    pub fn seeds(&self) -> &[DVec2] {
        &self.seeds
    }

    pub fn templates(&self) -> &[Raster] {
        &self.templates
    }

    pub fn working_width(&self) -> usize {
        self.working_width
    }

    /// `(width, height)` of every rectified frame.
    pub fn output_size(&self) -> (usize, usize) {
        self.output_size
    }

    /// Lattice fit of the reference frame; its transform is `image1_from_lattice`.
    pub fn reference_fit(&self) -> &LatticeFit {
        &self.reference_fit
    }

    pub fn image1_from_lattice(&self) -> Affine {
        self.reference_fit.transform
    }

    /// Locate every reticle mark on a working-resolution frame.
    ///
    /// Each mark is searched in a window around its seed, so marks must not
    /// move more than the search radius from their reference position.
    pub fn detect_marks(&self, working: &Raster) -> Vec<DVec2> {
        detect(
            working,
            &self.seeds,
            &self.templates,
            &self.correlator,
            &self.config,
        )
    }

    /// Register one full-resolution frame and resample it into the reference canvas.
    pub fn rectify_frame(&self, full: &Raster) -> Result<RectifiedFrame> {
        let (working, working_from_full) = normalize_to_width(full, self.working_width)?;

        let detected = self.detect_marks(&working);
        let fit = lattice::fit_lattice_transform(&self.lattice_points, &detected)?;

        let lattice_from_frame = fit.transform.inverse()?;
        let image1_from_frame = self.image1_from_lattice() * lattice_from_frame;
        let image1_from_full = image1_from_frame * working_from_full;

        let image = warp(full, &image1_from_full, Some(self.output_size))?;
        let reference_residuals = lattice::residuals(&image1_from_frame, &detected, &self.seeds);

        Ok(RectifiedFrame {
            image,
            detected,
            fit,
            image1_from_frame,
            image1_from_full,
            reference_residuals,
        })
    }

    /// Rectify every frame of `source`, with up to `max_frames_in_flight`
    /// frames processed concurrently, and collect the outcomes in frame order.
    ///
    /// Every rectified image stays in memory until this returns; use
    /// [`Rectifier::rectify_sequence_with`] to handle long sequences frame by
    /// frame.
    pub fn rectify_sequence<S>(&self, source: &S) -> Vec<FrameOutcome>
    where
        S: FrameSource + ?Sized,
    {
        let outcomes = Mutex::new(Vec::with_capacity(source.len()));
        self.rectify_sequence_with(source, |outcome| {
            outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(outcome);
        });

        let mut outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcomes.sort_unstable_by_key(|o| o.index);
        outcomes
    }

    /// Rectify every frame of `source` and hand each outcome to `sink` as soon
    /// as it is ready.
    ///
    /// At most `max_frames_in_flight` frames are loaded at once, and a frame is
    /// dropped when `sink` returns, so memory stays bounded however long the
    /// sequence is. `sink` is called from worker threads and not in frame
    /// order. A frame that fails to load or register is logged and passed on
    /// as a failed outcome; the remaining frames are unaffected.
    ///
    /// Returns the number of failed frames.
    pub fn rectify_sequence_with<S, F>(&self, source: &S, sink: F) -> usize
    where
        S: FrameSource + ?Sized,
        F: Fn(FrameOutcome) + Sync,
    {
        let start = Instant::now();
        let total = source.len();
        let failed = AtomicUsize::new(0);
        tracing::info!(frames = total, "rectifying sequence");

        par_for_each_indexed_limited(total, self.config.max_frames_in_flight, |index| {
            let result = source
                .load(index)
                .and_then(|full| self.rectify_frame(&full));
            match &result {
                Ok(frame) => tracing::debug!(
                    frame = index,
                    rms_error = frame.fit.rms_error,
                    "frame rectified"
                ),
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(frame = index, "frame rectification failed: {e}")
                }
            }
            sink(FrameOutcome { index, result });
        });

        let failed = failed.into_inner();
        tracing::info!(
            frames = total,
            succeeded = total - failed,
            failed,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "sequence rectified"
        );

        failed
    }
}

/// Correlate an inverted window around each seed with its template.
///
/// Returns `seed + offset` per mark.
fn detect(
    working: &Raster,
    seeds: &[DVec2],
    templates: &[Raster],
    correlator: &CrossCorrelator,
    config: &Config,
) -> Vec<DVec2> {
    let inverted = raster::invert(working, config.intensity_max);
    let radius = config.window_radius;
    let search_radius = Some(config.search_radius);

    seeds
        .par_iter()
        .zip(templates.par_iter())
        .map(|(&seed, template)| {
            let window = raster::crop_window(&inverted, seed, radius);
            let offset = correlator.offset(&window, template, search_radius);
            seed + DVec2::new(offset.col as f64, offset.row as f64)
        })
        .collect()
}
