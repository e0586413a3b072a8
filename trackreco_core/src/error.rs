//! Reconstruction errors.

use thiserror::Error;
use trackreco_env::EnvError;

/// Errors raised by the fitter, the linearizer and the density grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoError {
    #[error("Propagation failed: {0}")]
    Propagation(#[from] EnvError),

    #[error("Singular system: {0}")]
    SingularSystem(String),

    #[error("Density grid is empty")]
    EmptyGrid,

    #[error("Density peak at grid edge (bin {0})")]
    EdgeOfGrid(usize),

    #[error("Non-finite density in bin {0}")]
    NonFiniteDensity(usize),

    #[error("No half-maximum crossing found on the {0} side of the peak")]
    NoHalfMaxCrossing(&'static str),

    #[error("Track parameters carry no covariance")]
    MissingCovariance,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No measurements found on the navigated surfaces")]
    NoMeasurements,
}

impl RecoError {
    /// Creates a singular-system error.
    pub fn singular(what: impl Into<String>) -> Self {
        Self::SingularSystem(what.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RecoError>;
