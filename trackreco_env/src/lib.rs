//! trackreco collaborator layer
//!
//! This crate holds everything the reconstruction algorithms consume but do
//! not own: the bound parameter definitions, the surface and propagator
//! contracts, and the conditions contexts that are threaded through every
//! call.
//!
//! # Reference Implementations
//!
//! The contracts are traits so that a field-aware propagator or a full
//! detector geometry can be plugged in. For tests and the synthetic harness
//! the crate ships field-free reference implementations:
//!
//! - [`PlaneSurface`] and [`PerigeeSurface`]
//! - [`StraightLinePropagator`]
//!
//! # Example
//!
//! ```ignore
//! use trackreco_env::{BoundTrackParameters, Propagator, PropagatorOptions, StraightLinePropagator};
//!
//! let out = StraightLinePropagator::new().propagate(&gctx, &start, &target, &PropagatorOptions::default())?;
//! println!("path length: {}", out.path_length);
//! ```

mod context;
mod error;
mod parameters;
mod propagator;
mod straight_line;
mod surface;
mod types;

pub use context::{CalibrationContext, GeometryContext};
pub use error::EnvError;
pub use parameters::BoundTrackParameters;
pub use propagator::{Direction, PropagationOutput, Propagator, PropagatorOptions};
pub use straight_line::StraightLinePropagator;
pub use surface::{GeometryIdentifier, PerigeeSurface, PlaneSurface, Surface};
pub use types::{
    difference_periodic, make_direction_from_phi_theta, normalize_phi_theta,
    phi_theta_from_direction, radian_sym, wrap_periodic, BoundMatrix, BoundSquareMatrix,
    BoundVector, SquareMatrix2, Vector4, BOUND_LOC0, BOUND_LOC1, BOUND_PHI, BOUND_QOVERP,
    BOUND_SIZE, BOUND_THETA, BOUND_TIME,
};
