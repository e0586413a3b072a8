//! Measurements, track states and fitted tracks.

pub mod measurement;
pub mod track;
pub mod trajectory;

pub use measurement::{
    local_projector, Measurement, MeasurementCovariance, MeasurementVector, Projector, SourceLink,
    MEAS_DIM,
};
pub use track::{Track, TrackContainer};
pub use trajectory::{BackwardsIter, TrackState, TrackStatePropMask, TrackStateType, VectorTrajectory};
