//! Conditions contexts threaded through geometry, propagation and calibration.
//!
//! Contexts are opaque to the fitting and vertexing code: they are accepted
//! and handed on to the collaborators unchanged, so that conditions such as
//! alignment or calibration constants can be selected per event without any
//! global state.

use serde::{Deserialize, Serialize};

/// Geometry conditions (alignment) in effect for a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryContext {
    /// Conditions interval the geometry belongs to
    pub interval: u64,
}

impl GeometryContext {
    /// Creates a context for a given conditions interval.
    pub fn new(interval: u64) -> Self {
        Self { interval }
    }
}

/// Calibration conditions in effect for a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationContext {
    /// Conditions interval the calibration constants belong to
    pub interval: u64,
}
