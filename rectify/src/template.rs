//! Synthetic reticle-mark templates.
//!
//! A mark is a cross whose four arms may each be present or absent. Templates
//! are rendered once per lattice point and matched against dark-on-light frame
//! windows after those have been inverted, so the default foreground is bright.

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::raster::Raster;

pub const DEFAULT_ARM_LENGTH: usize = 30;
pub const DEFAULT_HALF_WIDTH: usize = 2;
pub const DEFAULT_BACKGROUND: f32 = 0.0;
pub const DEFAULT_FOREGROUND: f32 = 255.0;

/// Shape of a single reticle mark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkDescriptor {
    pub north: bool,
    pub south: bool,
    pub east: bool,
    pub west: bool,
    /// Arm length in pixels, measured from the mark centre.
    #[serde(default = "default_arm_length")]
    pub arm_length: usize,
    /// Half the stroke width in pixels.
    #[serde(default = "default_half_width")]
    pub half_width: usize,
    #[serde(default = "default_background")]
    pub background: f32,
    #[serde(default = "default_foreground")]
    pub foreground: f32,
}

fn default_arm_length() -> usize {
    DEFAULT_ARM_LENGTH
}

fn default_half_width() -> usize {
    DEFAULT_HALF_WIDTH
}

fn default_background() -> f32 {
    DEFAULT_BACKGROUND
}

fn default_foreground() -> f32 {
    DEFAULT_FOREGROUND
}

impl Default for MarkDescriptor {
    /// A full cross with all four arms.
    fn default() -> Self {
        Self::new(true, true, true, true)
    }
}

impl MarkDescriptor {
    /// Mark with the given arms and default geometry.
    pub fn new(north: bool, south: bool, east: bool, west: bool) -> Self {
        Self {
            north,
            south,
            east,
            west,
            arm_length: DEFAULT_ARM_LENGTH,
            half_width: DEFAULT_HALF_WIDTH,
            background: DEFAULT_BACKGROUND,
            foreground: DEFAULT_FOREGROUND,
        }
    }

    pub fn with_arm_length(mut self, arm_length: usize) -> Self {
        self.arm_length = arm_length;
        self
    }

    /// Default mark for grid position `(ix, iy)` of a `cols x rows` lattice.
    ///
    /// Arms that would point off the edge of the grid are dropped. Row 0 is
    /// the top row, so it has no north arm.
    pub fn from_lattice_position(ix: usize, iy: usize, cols: usize, rows: usize) -> Self {
        Self::new(iy > 0, iy + 1 < rows, ix + 1 < cols, ix > 0)
    }

    /// Render the mark into a `2 * radius` square raster centred at `(radius, radius)`.
    ///
    /// Arms longer than `radius` are clipped to the raster.
    pub fn render(&self, radius: usize) -> Raster {
        let side = 2 * radius;
        let mut raster = Buffer2::new_filled(side, side, self.background);

        let c = radius as i64;
        let l = self.arm_length as i64;
        let w = self.half_width as i64;

        // (row range, column range), half-open
        let arms = [
            (self.north, (c - l, c + w), (c - w, c + w)),
            (self.south, (c - w, c + l), (c - w, c + w)),
            (self.east, (c - w, c + w), (c - w, c + l)),
            (self.west, (c - w, c + w), (c - l, c + w)),
        ];

        for (present, rows, cols) in arms {
            if present {
                fill_rect(&mut raster, rows, cols, self.foreground);
            }
        }

        raster
    }
}

fn fill_rect(raster: &mut Raster, rows: (i64, i64), cols: (i64, i64), value: f32) {
    let clip = |(start, end): (i64, i64), len: usize| {
        let start = start.clamp(0, len as i64) as usize;
        let end = end.clamp(0, len as i64) as usize;
        start..end.max(start)
    };

    let width = raster.width();
    let height = raster.height();
    for y in clip(rows, height) {
        for x in clip(cols, width) {
            raster[(x, y)] = value;
        }
    }
}

/// Render one template per descriptor, in order.
pub fn render_templates(descriptors: &[MarkDescriptor], radius: usize) -> Vec<Raster> {
    descriptors.iter().map(|d| d.render(radius)).collect()
}
