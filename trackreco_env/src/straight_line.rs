//! Field-free reference propagator.

use crate::context::GeometryContext;
use crate::error::EnvError;
use crate::parameters::BoundTrackParameters;
use crate::propagator::{PropagationOutput, Propagator, PropagatorOptions};
use crate::surface::Surface;
use crate::types::{
    difference_periodic, make_direction_from_phi_theta, BoundMatrix, BoundVector, BOUND_LOC0,
    BOUND_LOC1, BOUND_PHI, BOUND_QOVERP, BOUND_SIZE, BOUND_THETA, BOUND_TIME,
};
use nalgebra::Vector2;
use std::f64::consts::PI;
use std::sync::Arc;

/// Propagates tracks along straight lines (no magnetic field, no material).
///
/// Time advances by the path length (c = 1). The bound-to-bound Jacobian is
/// obtained from central finite differences of the transport, which keeps
/// the propagator valid for any [`Surface`] implementation.
#[derive(Debug, Clone)]
pub struct StraightLinePropagator {
    /// Relative finite-difference step for the transport Jacobian
    jacobian_step: f64,
}

impl StraightLinePropagator {
    /// Creates a propagator with the default Jacobian step (1e-6).
    pub fn new() -> Self {
        Self { jacobian_step: 1e-6 }
    }

    /// Sets the relative finite-difference step.
    pub fn with_jacobian_step(mut self, step: f64) -> Self {
        self.jacobian_step = step;
        self
    }

    /// Moves a bound parameter vector from `start` onto `target`.
    ///
    /// Returns the new vector and the signed path length.
    fn transport(
        &self,
        gctx: &GeometryContext,
        start: &dyn Surface,
        params: &BoundVector,
        target: &dyn Surface,
        tolerance: f64,
    ) -> Result<(BoundVector, f64), EnvError> {
        let direction = make_direction_from_phi_theta(params[BOUND_PHI], params[BOUND_THETA]);
        let local = Vector2::new(params[BOUND_LOC0], params[BOUND_LOC1]);
        let position = start.local_to_global(gctx, &local, &direction);

        let path_length = target.intersect(gctx, &position, &direction)?;
        let end = position + direction * path_length;
        let end_local = target.global_to_local(gctx, &end, &direction, tolerance)?;

        let mut transported = *params;
        transported[BOUND_LOC0] = end_local.x;
        transported[BOUND_LOC1] = end_local.y;
        transported[BOUND_TIME] += path_length;
        Ok((transported, path_length))
    }

    fn transport_jacobian(
        &self,
        gctx: &GeometryContext,
        start: &dyn Surface,
        params: &BoundVector,
        target: &dyn Surface,
        tolerance: f64,
    ) -> Result<BoundMatrix, EnvError> {
        let mut jacobian = BoundMatrix::zeros();
        for i in 0..BOUND_SIZE {
            let h = self.jacobian_step * params[i].abs().max(1.0);

            let mut up = *params;
            up[i] += h;
            let mut down = *params;
            down[i] -= h;

            let (f_up, _) = self.transport(gctx, start, &up, target, tolerance)?;
            let (f_down, _) = self.transport(gctx, start, &down, target, tolerance)?;

            let mut column = (f_up - f_down) / (2.0 * h);
            column[BOUND_PHI] =
                difference_periodic(f_up[BOUND_PHI], f_down[BOUND_PHI], 2.0 * PI) / (2.0 * h);
            jacobian.set_column(i, &column);
        }

        // Direction and momentum are constants of straight-line motion
        for row in [BOUND_PHI, BOUND_THETA, BOUND_QOVERP] {
            jacobian.row_mut(row).fill(0.0);
            jacobian[(row, row)] = 1.0;
        }
        Ok(jacobian)
    }
}

impl Default for StraightLinePropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl Propagator for StraightLinePropagator {
    fn propagate(
        &self,
        gctx: &GeometryContext,
        start: &BoundTrackParameters,
        target: &Arc<dyn Surface>,
        options: &PropagatorOptions,
    ) -> Result<PropagationOutput, EnvError> {
        let start_surface = start.reference_surface().as_ref();
        let (end_vector, path_length) = self.transport(
            gctx,
            start_surface,
            start.parameters(),
            target.as_ref(),
            options.target_tolerance,
        )?;

        if path_length * options.direction.sign() < -options.target_tolerance {
            return Err(EnvError::SurfaceNotReached {
                surface: target.geometry_id(),
                path_length,
            });
        }
        if path_length.abs() > options.path_limit {
            return Err(EnvError::PathLimitExceeded {
                path_length,
                limit: options.path_limit,
            });
        }

        let jacobian = self.transport_jacobian(
            gctx,
            start_surface,
            start.parameters(),
            target.as_ref(),
            options.target_tolerance,
        )?;
        let covariance = start
            .covariance()
            .map(|cov| jacobian * cov * jacobian.transpose());

        Ok(PropagationOutput {
            end_parameters: start.rebound(Arc::clone(target), end_vector, covariance),
            jacobian,
            path_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagator::Direction;
    use crate::surface::{GeometryIdentifier, PerigeeSurface, PlaneSurface};
    use crate::types::{BoundSquareMatrix, Vector4};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn plane_at(x: f64, id: u64) -> Arc<dyn Surface> {
        Arc::new(PlaneSurface::new(GeometryIdentifier(id), Vector3::new(x, 0.0, 0.0), Vector3::x()))
    }

    fn start_on_plane(y: f64, z: f64, phi: f64, theta: f64) -> BoundTrackParameters {
        let params = BoundVector::from([y, z, phi, theta, 0.5, 0.0]);
        BoundTrackParameters::new(plane_at(0.0, 100), params, Some(BoundSquareMatrix::identity() * 0.01))
    }

    #[test]
    fn test_plane_to_plane_matches_analytic_line() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let (y, z, phi, theta) = (1.0, -2.0, 0.1, 1.4);
        let l = 50.0;
        let start = start_on_plane(y, z, phi, theta);

        let out = propagator
            .propagate(&gctx, &start, &plane_at(l, 1), &PropagatorOptions::default())
            .unwrap();
        let end = out.end_parameters.parameters();

        let s = l / (phi.cos() * theta.sin());
        assert_relative_eq!(out.path_length, s, epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_LOC0], y + l * phi.tan(), epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_LOC1], z + l * theta.cos() / (phi.cos() * theta.sin()), epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_TIME], s, epsilon = 1e-9);
        assert_eq!(out.end_parameters.reference_surface().geometry_id(), GeometryIdentifier(1));
    }

    #[test]
    fn test_jacobian_matches_analytic_derivatives() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let (phi, theta) = (0.2, 1.2);
        let l = 80.0;
        let start = start_on_plane(0.5, 0.5, phi, theta);

        let jac = propagator
            .propagate(&gctx, &start, &plane_at(l, 1), &PropagatorOptions::default())
            .unwrap()
            .jacobian;

        let cos2_phi = phi.cos() * phi.cos();
        let sin2_theta = theta.sin() * theta.sin();

        assert_relative_eq!(jac[(BOUND_LOC0, BOUND_LOC0)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(BOUND_LOC1, BOUND_LOC1)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(BOUND_LOC0, BOUND_PHI)], l / cos2_phi, max_relative = 1e-6);
        assert_relative_eq!(
            jac[(BOUND_LOC1, BOUND_PHI)],
            l * phi.sin() * theta.cos() / (theta.sin() * cos2_phi),
            max_relative = 1e-6
        );
        assert_relative_eq!(
            jac[(BOUND_LOC1, BOUND_THETA)],
            -l / (sin2_theta * phi.cos()),
            max_relative = 1e-6
        );
        assert_relative_eq!(
            jac[(BOUND_TIME, BOUND_THETA)],
            -l * theta.cos() / (phi.cos() * sin2_theta),
            max_relative = 1e-6
        );
        assert_eq!(jac[(BOUND_PHI, BOUND_PHI)], 1.0);
        assert_eq!(jac[(BOUND_QOVERP, BOUND_LOC0)], 0.0);
        assert_relative_eq!(jac[(BOUND_LOC0, BOUND_QOVERP)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_covariance_is_transported() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let start = start_on_plane(0.0, 0.0, 0.0, 0.5 * PI);

        let out = propagator
            .propagate(&gctx, &start, &plane_at(100.0, 1), &PropagatorOptions::default())
            .unwrap();
        let cov = out.end_parameters.covariance().unwrap();

        // var(y') = var(y) + L² var(phi)
        assert_relative_eq!(cov[(0, 0)], 0.01 + 100.0 * 100.0 * 0.01, max_relative = 1e-6);
        assert_relative_eq!(cov, &cov.transpose(), epsilon = 1e-9);
    }

    #[test]
    fn test_surface_behind_is_not_reached() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let start = start_on_plane(0.0, 0.0, 0.0, 0.5 * PI);

        let res = propagator.propagate(&gctx, &start, &plane_at(-10.0, 7), &PropagatorOptions::default());
        assert!(matches!(res, Err(EnvError::SurfaceNotReached { surface: GeometryIdentifier(7), .. })));

        let backward = PropagatorOptions::default().with_direction(Direction::Backward);
        let out = propagator.propagate(&gctx, &start, &plane_at(-10.0, 7), &backward).unwrap();
        assert_relative_eq!(out.path_length, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_path_limit() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let start = start_on_plane(0.0, 0.0, 0.0, 0.5 * PI);
        let options = PropagatorOptions {
            path_limit: 5.0,
            ..PropagatorOptions::default()
        };

        let res = propagator.propagate(&gctx, &start, &plane_at(10.0, 1), &options);
        assert!(matches!(res, Err(EnvError::PathLimitExceeded { .. })));
    }

    #[test]
    fn test_curvilinear_to_perigee() {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let pos4 = Vector4::new(10.0, 3.0, 4.0, 1.0);
        let start = BoundTrackParameters::curvilinear(pos4, Vector3::x(), -1.0, None);
        let perigee: Arc<dyn Surface> = Arc::new(PerigeeSurface::new(Vector3::zeros()));

        let options = PropagatorOptions::default().with_direction(Direction::Backward);
        let out = propagator.propagate(&gctx, &start, &perigee, &options).unwrap();
        let end = out.end_parameters.parameters();

        assert_relative_eq!(out.path_length, -10.0, epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_LOC0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_LOC1], 4.0, epsilon = 1e-9);
        assert_relative_eq!(end[BOUND_TIME], -9.0, epsilon = 1e-9);
        assert!(out.end_parameters.covariance().is_none());
    }
}
