//! trackreco core - track fitting and vertex seeding
//!
//! This library holds the numerical cores of the reconstruction chain:
//! 1. **Fitting**: global chi-square (GX2F) least-squares fit of track
//!    parameters to surface measurements
//! 2. **Vertex seeding**: Gaussian track density on a 1D grid along the beam
//!    axis, with mode and width estimation
//! 3. **Linearization**: numerical first-order expansion of perigee
//!    parameters around a vertex candidate
//!
//! Geometry, propagation and the parameter types come from `trackreco_env`.

pub mod error;
pub mod event_data;
pub mod fitting;
pub mod vertexing;

// Re-export key types for convenience
pub use error::{RecoError, Result};
pub use event_data::{
    Measurement, SourceLink, Track, TrackContainer, TrackState, TrackStatePropMask,
    VectorTrajectory, MEAS_DIM,
};
pub use fitting::{Gx2Fitter, Gx2FitterExtensions, Gx2FitterOptions, PassThroughCalibrator};
pub use vertexing::{
    GaussianGridTrackDensity, GridDensityConfig, LinearizedTrack, LinearizerConfig,
    NumericalTrackLinearizer,
};
