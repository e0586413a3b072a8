//! Harness errors.

use thiserror::Error;
use trackreco_core::RecoError;
use trackreco_env::EnvError;

/// Errors raised while generating or reconstructing a synthetic event.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Truth propagation failed: {0}")]
    Propagation(#[from] EnvError),

    #[error("Reconstruction failed: {0}")]
    Reco(#[from] RecoError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Assertion(String),
}
