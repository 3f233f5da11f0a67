//! Rectify - reticle-lattice registration of scanned image sequences.
//!
//! Frames of a sequence carry a fixed grid of fiducial crosses ("reticle
//! marks"). This library locates those marks in every frame by template
//! correlation, fits an affine lattice-to-image transform per frame and
//! resamples every frame into the coordinate system of the first one.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rectify::{CalibrationTable, Config, Rectifier};
//!
//! let table = CalibrationTable::builtin()?;
//! let calibration = table.get(7, "A")?;
//!
//! // Seeds recorded in the calibration anchor the first frame.
//! let rectifier = Rectifier::new(Config::default(), calibration, &frames[0], calibration)?;
//!
//! for outcome in rectifier.rectify_sequence(&frames) {
//!     if let Ok(frame) = outcome.result {
//!         save(outcome.index, &rectify::raster::to_u8(&frame.image));
//!     }
//! }
//! ```

pub mod config;
pub mod correlate;
pub mod error;
pub mod lattice;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod seed;
pub mod template;
pub mod transform;

pub use config::{CalibrationKey, CalibrationTable, ChannelCalibration, Config, ReferenceAnchor};
pub use correlate::{CrossCorrelator, Offset};
pub use error::{RectifyError, Result};
pub use lattice::{fit_lattice_transform, Lattice, LatticeFit};
pub use pipeline::{FrameOutcome, FrameSource, LazyFrames, RectifiedFrame, Rectifier};
pub use raster::Raster;
pub use resample::{normalize_to_width, warp};
pub use seed::{SeedProvider, StaticSeeds};
pub use template::{render_templates, MarkDescriptor};
pub use transform::Affine;
