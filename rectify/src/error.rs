//! Error types for rectification.

use thiserror::Error;

/// Errors produced by the rectification pipeline and its components.
///
/// Sampling outside a raster is not an error: those samples read as zero.
#[derive(Debug, Error)]
pub enum RectifyError {
    #[error("Degenerate transform: matrix is not invertible (determinant {determinant:e})")]
    DegenerateTransform { determinant: f64 },

    #[error("Insufficient calibration data ({points} points): {reason}")]
    InsufficientData { points: usize, reason: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load frame {index}: {reason}")]
    FrameLoad { index: usize, reason: String },

    #[error("Failed to parse calibration table: {0}")]
    CalibrationParse(#[from] serde_yml::Error),
}

pub type Result<T, E = RectifyError> = std::result::Result<T, E>;
