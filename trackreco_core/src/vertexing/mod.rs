//! Vertex seeding and track linearization.

pub mod density;
pub mod linearizer;

pub use density::{
    GaussianGridTrackDensity, GridDensityConfig, MainGridVector, TrackGridContribution,
    TrackGridVector,
};
pub use linearizer::{
    LinearizedTrack, LinearizerConfig, MomentumJacobian, NumericalTrackLinearizer,
    PositionJacobian,
};
