//! Propagation contract consumed by the fitter and the linearizer.

use crate::context::GeometryContext;
use crate::error::EnvError;
use crate::parameters::BoundTrackParameters;
use crate::surface::Surface;
use crate::types::BoundMatrix;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Propagation direction along the track momentum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// Direction matching the sign of `value`; zero counts as forward.
    pub fn from_scalar_zero_as_positive(value: f64) -> Self {
        if value >= 0.0 {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// +1 for forward, -1 for backward.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }

    /// The opposite direction.
    pub fn invert(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Plain propagation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatorOptions {
    /// Direction to propagate in (default: forward)
    pub direction: Direction,

    /// Maximum absolute path length in mm (default: 10 m)
    pub path_limit: f64,

    /// Distance within which a position counts as on-surface (default: 1e-4 mm)
    pub target_tolerance: f64,
}

impl Default for PropagatorOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            path_limit: 10_000.0,
            target_tolerance: 1e-4,
        }
    }
}

impl PropagatorOptions {
    /// Returns a copy with a different direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Result of a successful propagation.
#[derive(Debug, Clone)]
pub struct PropagationOutput {
    /// Parameters bound to the target surface (covariance transported if
    /// the start carried one)
    pub end_parameters: BoundTrackParameters,

    /// Bound-to-bound Jacobian from the start to the target surface
    pub jacobian: BoundMatrix,

    /// Signed path length travelled
    pub path_length: f64,
}

/// Transports track parameters to a target surface.
///
/// # Implementations
///
/// - **Reference**: [`crate::StraightLinePropagator`] (field-free)
/// - **Production**: a field-aware stepper wrapped behind this trait
///
/// Implementations fail with an [`EnvError`] when the target cannot be
/// reached (non-convergence, geometry miss, path limit).
pub trait Propagator {
    fn propagate(
        &self,
        gctx: &GeometryContext,
        start: &BoundTrackParameters,
        target: &Arc<dyn Surface>,
        options: &PropagatorOptions,
    ) -> Result<PropagationOutput, EnvError>;
}

impl<P: Propagator + ?Sized> Propagator for &P {
    fn propagate(
        &self,
        gctx: &GeometryContext,
        start: &BoundTrackParameters,
        target: &Arc<dyn Surface>,
        options: &PropagatorOptions,
    ) -> Result<PropagationOutput, EnvError> {
        (**self).propagate(gctx, start, target, options)
    }
}
