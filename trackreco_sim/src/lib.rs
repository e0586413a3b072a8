//! trackreco Deterministic Simulation Harness
//!
//! This crate provides a synthetic telescope detector on which the whole
//! reconstruction chain runs reproducibly:
//!
//! - **Detector**: planes perpendicular to the x axis measuring (y, z)
//! - **Oracle**: straight-line truth particles, Gaussian measurement noise
//!   and smeared start parameters, all drawn from one seeded ChaCha8 stream
//! - **Runner**: GX2F fit, grid density vertex seeding and linearization,
//!   checked against the truth
//!
//! # Usage
//!
//! ```ignore
//! use trackreco_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_tracks(50).run(ScenarioId::SingleVertex);
//! assert!(result.passed);
//! ```

mod detector;
mod error;
mod oracle;
mod runner;
pub mod scenarios;

pub use detector::{Detector, DetectorConfig};
pub use error::SimError;
pub use oracle::{Oracle, SimulatedTrack, TruthParticle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::{ScenarioConfig, ScenarioId};
