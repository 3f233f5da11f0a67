//! Pipeline tuning and per-channel calibration tables.

use std::collections::BTreeMap;
use std::path::Path;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::{RectifyError, Result};
use crate::lattice::Lattice;
use crate::raster::MAX_INTENSITY;
use crate::template::MarkDescriptor;


// =============================================================================
// Pipeline configuration
// =============================================================================

/// Which points anchor the reference frame's lattice transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceAnchor {
    /// Fit `image1_from_lattice` to the seed points themselves.
    #[default]
    Seeds,
    /// Run mark detection on the reference frame and fit to the detected points.
    Detected,
}

/// Tuning parameters of the rectification pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Half-size of the square window sampled around each seed, and the
    /// template radius. Windows are `2 * window_radius` pixels on a side.
    pub window_radius: usize,
    /// Maximum accepted mark displacement from its seed, in working pixels.
    pub search_radius: usize,
    /// Full-scale intensity. Frames are inverted as `intensity_max - v`
    /// before matching, so dark marks correlate with bright templates.
    pub intensity_max: f32,
    /// `(width, height)` of the rectified output. `None` uses a
    /// `working_width` square.
    pub output_size: Option<(usize, usize)>,
    pub reference_anchor: ReferenceAnchor,
    /// Upper bound on frames decoded and processed at the same time.
    pub max_frames_in_flight: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_radius: 50,
            search_radius: 20,
            intensity_max: MAX_INTENSITY,
            output_size: None,
            reference_anchor: ReferenceAnchor::default(),
            max_frames_in_flight: 8,
        }
    }
}

impl Config {
    /// Validate configuration parameters.
    pub fn validate(&self) {
        assert!(
            self.window_radius > 0,
            "window_radius must be positive, got {}",
            self.window_radius
        );
        assert!(
            self.search_radius > 0 && self.search_radius <= self.window_radius,
            "search_radius must be in (0, window_radius], got {} (window_radius {})",
            self.search_radius,
            self.window_radius
        );
        assert!(
            self.intensity_max.is_finite() && self.intensity_max > 0.0,
            "intensity_max must be positive and finite, got {}",
            self.intensity_max
        );
        if let Some((width, height)) = self.output_size {
            assert!(
                width > 0 && height > 0,
                "output_size must be non-empty, got ({}, {})",
                width,
                height
            );
        }
        assert!(
            self.max_frames_in_flight > 0,
            "max_frames_in_flight must be positive, got {}",
            self.max_frames_in_flight
        );
    }
}

// =============================================================================
// Calibration tables
// =============================================================================

/// Identifies one camera channel of one mission, e.g. `7A`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalibrationKey {
    pub mission: u32,
    pub channel: String,
}

impl CalibrationKey {
    pub fn new(mission: u32, channel: impl Into<String>) -> Self {
        Self {
            mission,
            channel: channel.into(),
        }
    }
}

impl std::fmt::Display for CalibrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.mission, self.channel)
    }
}

/// Static calibration of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalibration {
    pub lattice: Lattice,
    /// Width in pixels of the working resolution frames are scaled to.
    pub working_width: usize,
    /// One mark descriptor per lattice point, in lattice order.
    pub marks: Vec<MarkDescriptor>,
    /// Reference-frame seed points in working pixels, if known ahead of time.
    pub seeds: Option<Vec<DVec2>>,
}

impl ChannelCalibration {
    /// Calibration with marks derived from the lattice edges and no seeds.
    pub fn new(lattice: Lattice, working_width: usize) -> Self {
        let marks = lattice.default_marks();
        Self {
            lattice,
            working_width,
            marks,
            seeds: None,
        }
    }

    pub fn with_marks(mut self, marks: Vec<MarkDescriptor>) -> Self {
        self.marks = marks;
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<DVec2>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    /// Check that lattice, marks and seeds agree in size.
    pub fn validate(&self) -> Result<()> {
        self.lattice.validate()?;
        if self.working_width == 0 {
            return Err(RectifyError::Configuration(
                "working_width must be positive".into(),
            ));
        }
        let points = self.lattice.len();
        if self.marks.len() != points {
            return Err(RectifyError::Configuration(format!(
                "{} mark descriptors for {} lattice points",
                self.marks.len(),
                points
            )));
        }
        if let Some(seeds) = &self.seeds {
            if seeds.len() != points {
                return Err(RectifyError::Configuration(format!(
                    "{} seed points for {} lattice points",
                    seeds.len(),
                    points
                )));
            }
        }
        Ok(())
    }
}

/// Calibrations keyed by (mission, channel).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    channels: BTreeMap<CalibrationKey, ChannelCalibration>,
}

/// On-disk layout of a calibration table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalibrationFile {
    #[serde(default)]
    mark_sets: BTreeMap<String, Vec<MarkDescriptor>>,
    channels: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChannelEntry {
    mission: u32,
    channel: String,
    lattice: Lattice,
    working_width: usize,
    #[serde(default)]
    marks: Option<MarkSource>,
    #[serde(default)]
    seeds: Option<Vec<DVec2>>,
}

/// Either the name of an entry in `mark_sets` or an inline list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarkSource {
    Named(String),
    Inline(Vec<MarkDescriptor>),
}

const BUILTIN_RANGER: &str = include_str!("../calibration/ranger.yaml");

impl CalibrationTable {
    /// Parse and validate a YAML calibration table.
    ///
    /// Channels without `marks` get marks derived from their lattice edges.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CalibrationFile = serde_yml::from_str(yaml)?;

        let mut table = Self::default();
        for entry in file.channels {
            let key = CalibrationKey::new(entry.mission, entry.channel);
            let marks = match entry.marks {
                None => entry.lattice.default_marks(),
                Some(MarkSource::Inline(marks)) => marks,
                Some(MarkSource::Named(name)) => file
                    .mark_sets
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| {
                        RectifyError::Configuration(format!(
                            "channel {key} references unknown mark set '{name}'"
                        ))
                    })?,
            };

            let calibration = ChannelCalibration {
                lattice: entry.lattice,
                working_width: entry.working_width,
                marks,
                seeds: entry.seeds,
            };
            if table.channels.contains_key(&key) {
                return Err(RectifyError::Configuration(format!(
                    "duplicate calibration for channel {key}"
                )));
            }
            table.insert(key, calibration)?;
        }

        tracing::debug!(channels = table.len(), "loaded calibration table");
        Ok(table)
    }

    /// Read and parse a YAML calibration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            RectifyError::Configuration(format!(
                "cannot read calibration file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// The bundled Ranger 7 and 8 calibration.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_RANGER)
    }

    /// Add or replace a channel after validating it.
    pub fn insert(&mut self, key: CalibrationKey, calibration: ChannelCalibration) -> Result<()> {
        calibration.validate().map_err(|e| match e {
            RectifyError::Configuration(msg) => {
                RectifyError::Configuration(format!("channel {key}: {msg}"))
            }
            other => other,
        })?;
        self.channels.insert(key, calibration);
        Ok(())
    }

    pub fn get(&self, mission: u32, channel: &str) -> Result<&ChannelCalibration> {
        let key = CalibrationKey::new(mission, channel);
        self.channels.get(&key).ok_or_else(|| {
            RectifyError::Configuration(format!("no calibration for channel {key}"))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &CalibrationKey> {
        self.channels.keys()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
