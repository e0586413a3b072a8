//! Numerical track linearization around a vertex candidate.
//!
//! The track is propagated to its point of closest approach (PCA) to the
//! linearization point. Each of the seven PCA coordinates (x, y, z, t, phi,
//! theta, q/p) is then wiggled in turn, the wiggled track is propagated to
//! the same perigee, and the finite-difference quotients form the Jacobian
//! of the perigee parameters with respect to position and momentum.

use crate::error::{RecoError, Result};
use nalgebra::{SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, error, Span};
use trackreco_env::{
    difference_periodic, make_direction_from_phi_theta, BoundSquareMatrix, BoundTrackParameters,
    BoundVector, Direction, GeometryContext, PerigeeSurface, Propagator, PropagatorOptions,
    Surface, Vector4, BOUND_PHI, BOUND_QOVERP, BOUND_SIZE, BOUND_THETA,
};

/// Number of linearized coordinates: 4D position plus (phi, theta, q/p).
const LIN_SIZE: usize = 7;
const LIN_PHI: usize = 4;
const LIN_THETA: usize = 5;
const LIN_QOVERP: usize = 6;

/// Jacobian of the perigee parameters w.r.t. the 4D PCA position.
pub type PositionJacobian = SMatrix<f64, BOUND_SIZE, 4>;

/// Jacobian of the perigee parameters w.r.t. (phi, theta, q/p) at the PCA.
pub type MomentumJacobian = SMatrix<f64, BOUND_SIZE, 3>;

type LinVector = SVector<f64, LIN_SIZE>;

/// Configuration for the [`NumericalTrackLinearizer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearizerConfig {
    /// Finite-difference step applied to every coordinate (default: 1e-8)
    pub delta: f64,

    /// Options for every propagation; the direction is overwritten per call
    pub propagator_options: PropagatorOptions,
}

impl Default for LinearizerConfig {
    fn default() -> Self {
        Self {
            delta: 1e-8,
            propagator_options: PropagatorOptions::default(),
        }
    }
}

/// First-order expansion of a track's perigee parameters around a point.
///
/// `parameters_at_pca ≈ position_jacobian · position_at_pca
///  + momentum_jacobian · momentum_at_pca + constant_term`
#[derive(Debug, Clone)]
pub struct LinearizedTrack {
    pub parameters_at_pca: BoundVector,
    pub covariance_at_pca: BoundSquareMatrix,
    pub weight_at_pca: BoundSquareMatrix,
    pub linearization_point: Vector4,
    pub position_jacobian: PositionJacobian,
    pub momentum_jacobian: MomentumJacobian,
    /// PCA position and time
    pub position_at_pca: Vector4,
    /// (phi, theta, q/p) at the PCA
    pub momentum_at_pca: Vector3<f64>,
    pub constant_term: BoundVector,
}

impl LinearizedTrack {
    /// Perigee parameters predicted by the expansion for a given 4D
    /// position and (phi, theta, q/p).
    pub fn predict(&self, position: &Vector4, momentum: &Vector3<f64>) -> BoundVector {
        self.position_jacobian * position + self.momentum_jacobian * momentum + self.constant_term
    }
}

/// Linearizes tracks by wiggling their PCA coordinates.
pub struct NumericalTrackLinearizer<P> {
    propagator: P,
    config: LinearizerConfig,
    span: Span,
}

impl<P: Propagator> NumericalTrackLinearizer<P> {
    pub fn new(propagator: P, config: LinearizerConfig) -> Self {
        Self {
            propagator,
            config,
            span: tracing::info_span!("NumericalTrackLinearizer"),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &LinearizerConfig {
        &self.config
    }

    /// Linearizes `params` around `lin_point`.
    ///
    /// # Errors
    ///
    /// - [`RecoError::Propagation`] if any propagation to the perigee fails
    /// - [`RecoError::MissingCovariance`] if the parameters at the PCA carry
    ///   no covariance
    /// - [`RecoError::SingularSystem`] if that covariance cannot be inverted
    /// - [`RecoError::Configuration`] if wiggling theta leaves [0, π]
    pub fn linearize_track(
        &self,
        params: &BoundTrackParameters,
        lin_point: &Vector4,
        gctx: &GeometryContext,
    ) -> Result<LinearizedTrack> {
        let _guard = self.span.enter();
        let delta = self.config.delta;

        let perigee: Arc<dyn Surface> = Arc::new(PerigeeSurface::new(lin_point.xyz()));

        let options = self.options_towards(&perigee, &params.position(gctx), &params.direction(), gctx)?;
        let at_pca = self.propagator.propagate(gctx, params, &perigee, &options)?.end_parameters;

        let perigee_params = *at_pca.parameters();
        let covariance_at_pca = *at_pca.covariance().ok_or(RecoError::MissingCovariance)?;
        let weight_at_pca = covariance_at_pca
            .try_inverse()
            .ok_or_else(|| RecoError::singular("covariance at PCA"))?;

        let position_at_pca = at_pca.four_position(gctx);
        let momentum_at_pca = Vector3::new(
            perigee_params[BOUND_PHI],
            perigee_params[BOUND_THETA],
            perigee_params[BOUND_QOVERP],
        );

        let wiggled_theta = momentum_at_pca.y + delta;
        if !(0.0..=PI).contains(&wiggled_theta) {
            error!(
                theta = momentum_at_pca.y,
                delta, "wiggling theta leaves [0, pi]; reduce the step size"
            );
            return Err(RecoError::config(format!(
                "theta {} + delta {} outside [0, pi]",
                momentum_at_pca.y, delta
            )));
        }

        let mut lin_vector = LinVector::zeros();
        lin_vector.fixed_rows_mut::<4>(0).copy_from(&position_at_pca);
        lin_vector.fixed_rows_mut::<3>(4).copy_from(&momentum_at_pca);

        let mut jacobian = SMatrix::<f64, BOUND_SIZE, LIN_SIZE>::zeros();
        for i in 0..LIN_SIZE {
            let mut wiggled = lin_vector;
            wiggled[i] += delta;

            let direction = make_direction_from_phi_theta(wiggled[LIN_PHI], wiggled[LIN_THETA]);
            let pos4 = Vector4::new(wiggled[0], wiggled[1], wiggled[2], wiggled[3]);
            let wiggled_params =
                BoundTrackParameters::curvilinear(pos4, direction, wiggled[LIN_QOVERP], None);

            let options = self.options_towards(&perigee, &pos4.xyz(), &direction, gctx)?;
            let wiggled_perigee = *self
                .propagator
                .propagate(gctx, &wiggled_params, &perigee, &options)?
                .end_parameters
                .parameters();

            let mut column = (wiggled_perigee - perigee_params) / delta;
            column[BOUND_PHI] =
                difference_periodic(wiggled_perigee[BOUND_PHI], perigee_params[BOUND_PHI], 2.0 * PI)
                    / delta;
            jacobian.set_column(i, &column);
        }

        let position_jacobian: PositionJacobian = jacobian.fixed_columns::<4>(0).into_owned();
        let momentum_jacobian: MomentumJacobian = jacobian.fixed_columns::<3>(4).into_owned();
        let constant_term =
            perigee_params - position_jacobian * position_at_pca - momentum_jacobian * momentum_at_pca;

        debug!(
            d0 = perigee_params[0],
            z0 = perigee_params[1],
            "linearized track"
        );

        Ok(LinearizedTrack {
            parameters_at_pca: perigee_params,
            covariance_at_pca,
            weight_at_pca,
            linearization_point: *lin_point,
            position_jacobian,
            momentum_jacobian,
            position_at_pca,
            momentum_at_pca,
            constant_term,
        })
    }

    /// Propagator options pointing from `position` towards the perigee.
    fn options_towards(
        &self,
        perigee: &Arc<dyn Surface>,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        gctx: &GeometryContext,
    ) -> Result<PropagatorOptions> {
        let path_length = perigee.intersect(gctx, position, direction)?;
        Ok(self
            .config
            .propagator_options
            .clone()
            .with_direction(Direction::from_scalar_zero_as_positive(path_length)))
    }
}
