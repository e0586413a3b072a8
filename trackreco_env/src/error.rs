//! Error types for the trackreco collaborator layer.

use crate::surface::GeometryIdentifier;
use thiserror::Error;

/// Errors raised by surfaces and propagators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// Target surface lies against the requested propagation direction
    #[error("Surface {surface} not reached: path length {path_length:.6} opposes propagation direction")]
    SurfaceNotReached {
        surface: GeometryIdentifier,
        path_length: f64,
    },

    /// Straight-line extrapolation never meets the surface
    #[error("Direction is parallel to surface {0}")]
    ParallelToSurface(GeometryIdentifier),

    /// Propagation would exceed the configured path limit
    #[error("Path length {path_length:.3} exceeds limit {limit:.3}")]
    PathLimitExceeded { path_length: f64, limit: f64 },

    /// Global position is not on the surface within tolerance
    #[error("Position is {distance:.3e} off surface {surface}")]
    NotOnSurface {
        surface: GeometryIdentifier,
        distance: f64,
    },

    /// Parameters cannot be turned into a valid track state
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl EnvError {
    /// Creates an invalid-parameters error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }
}
