//! Synthetic telescope detector.
//!
//! A row of planes perpendicular to the x axis, measuring (y, z) in their
//! local frame, plus an unmeasured start plane through the origin on which
//! the fit starts.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trackreco_core::event_data::MeasurementCovariance;
use trackreco_env::{GeometryIdentifier, PlaneSurface, Surface};

/// Layout of the telescope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of measuring planes (default: 10)
    pub n_planes: usize,

    /// x position of the first measuring plane in mm (default: 30)
    pub first_plane_x: f64,

    /// Distance between consecutive planes in mm (default: 30)
    pub plane_spacing: f64,

    /// Intrinsic resolution of both local coordinates in mm (default: 0.05)
    pub resolution: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            n_planes: 10,
            first_plane_x: 30.0,
            plane_spacing: 30.0,
            resolution: 0.05,
        }
    }
}

/// The instantiated telescope.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    start_surface: Arc<dyn Surface>,
    planes: Vec<Arc<dyn Surface>>,
}

impl Detector {
    /// Builds the planes described by `config`. Measuring planes get the
    /// identifiers 1..=n; the start plane keeps the free-standing id 0.
    pub fn new(config: DetectorConfig) -> Self {
        let start_surface: Arc<dyn Surface> = Arc::new(PlaneSurface::new(
            GeometryIdentifier::default(),
            Vector3::zeros(),
            Vector3::x(),
        ));
        let planes = (0..config.n_planes)
            .map(|i| {
                let x = config.first_plane_x + i as f64 * config.plane_spacing;
                Arc::new(PlaneSurface::new(
                    GeometryIdentifier(i as u64 + 1),
                    Vector3::new(x, 0.0, 0.0),
                    Vector3::x(),
                )) as Arc<dyn Surface>
            })
            .collect();

        Self {
            config,
            start_surface,
            planes,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Plane through the origin on which start parameters are expressed.
    pub fn start_surface(&self) -> &Arc<dyn Surface> {
        &self.start_surface
    }

    /// Measuring planes in navigation order.
    pub fn planes(&self) -> &[Arc<dyn Surface>] {
        &self.planes
    }

    /// Covariance attached to every measurement.
    pub fn measurement_covariance(&self) -> MeasurementCovariance {
        MeasurementCovariance::identity() * self.config.resolution.powi(2)
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
