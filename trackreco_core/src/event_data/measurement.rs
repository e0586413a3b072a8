//! Measurements and the source links that refer to them.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use trackreco_env::{GeometryIdentifier, BOUND_SIZE};

/// Dimension of every measurement (two surface-local coordinates).
pub const MEAS_DIM: usize = 2;

/// Calibrated measurement vector.
pub type MeasurementVector = SVector<f64, MEAS_DIM>;

/// Calibrated measurement covariance.
pub type MeasurementCovariance = SMatrix<f64, MEAS_DIM, MEAS_DIM>;

/// Maps bound parameters onto the measured subspace.
pub type Projector = SMatrix<f64, MEAS_DIM, BOUND_SIZE>;

/// Projector onto (loc0, loc1).
pub fn local_projector() -> Projector {
    let mut proj = Projector::zeros();
    proj[(0, 0)] = 1.0;
    proj[(1, 1)] = 1.0;
    proj
}

/// Lightweight handle to an uncalibrated measurement.
///
/// Carries the surface the measurement was taken on and its index in the
/// caller's measurement store; the calibrator resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLink {
    pub geometry_id: GeometryIdentifier,
    pub index: usize,
}

impl SourceLink {
    pub fn new(geometry_id: GeometryIdentifier, index: usize) -> Self {
        Self { geometry_id, index }
    }
}

/// A raw 2D measurement on a surface, in surface-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub geometry_id: GeometryIdentifier,
    pub local: MeasurementVector,
    pub covariance: MeasurementCovariance,
}

impl Measurement {
    pub fn new(
        geometry_id: GeometryIdentifier,
        local: MeasurementVector,
        covariance: MeasurementCovariance,
    ) -> Self {
        Self {
            geometry_id,
            local,
            covariance,
        }
    }
}
