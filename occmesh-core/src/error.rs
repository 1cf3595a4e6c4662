//! Error types for occmesh

use crate::point::GridCoord;
use thiserror::Error;

/// Main error type for occmesh operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Grid coordinate {coord:?} is outside [0, {points_per_axis})^3")]
    InvalidCoordinate {
        coord: GridCoord,
        points_per_axis: usize,
    },

    #[error("Grid point {coord:?} has no evaluated value")]
    UnknownPoint { coord: GridCoord },

    #[error("Upsample limit of {steps} step(s) exceeded")]
    UpsampleLimitExceeded { steps: usize },

    #[error("No isosurface crosses threshold {threshold} in the sampled volume")]
    DegenerateGrid { threshold: f32 },

    #[error("Field evaluation failed: {0}")]
    FieldEvaluation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Whether this error is an expected per-input reconstruction failure
    /// rather than a defect in the caller.
    ///
    /// A field that never crosses the threshold is a legitimate outcome for
    /// some inputs; callers processing a batch report it and move on.
    pub fn is_reconstruction_failure(&self) -> bool {
        matches!(self, Error::DegenerateGrid { .. })
    }
}

/// Result type alias for occmesh operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_grid_is_reconstruction_failure() {
        assert!(Error::DegenerateGrid { threshold: 0.5 }.is_reconstruction_failure());
        assert!(!Error::UnknownPoint { coord: [0, 0, 0] }.is_reconstruction_failure());
        assert!(!Error::UpsampleLimitExceeded { steps: 2 }.is_reconstruction_failure());
    }

    #[test]
    fn test_invalid_coordinate_message() {
        let err = Error::InvalidCoordinate {
            coord: [-1, 0, 4],
            points_per_axis: 4,
        };
        assert_eq!(
            err.to_string(),
            "Grid coordinate [-1, 0, 4] is outside [0, 4)^3"
        );
    }
}
