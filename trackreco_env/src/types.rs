//! Bound parameter definitions shared by every trackreco component.
//!
//! Bound parameters are ordered `[loc0, loc1, phi, theta, q/p, time]`.
//! Lengths are in millimetres, time is expressed as path length (c = 1),
//! and momenta in GeV.

use nalgebra::{Matrix2, SMatrix, SVector, Vector3};
use std::f64::consts::PI;

// ============================================================================
// INDICES
// ============================================================================

/// First surface-local coordinate (d0 on a perigee surface)
pub const BOUND_LOC0: usize = 0;
/// Second surface-local coordinate (z0 on a perigee surface)
pub const BOUND_LOC1: usize = 1;
/// Azimuthal direction angle
pub const BOUND_PHI: usize = 2;
/// Polar direction angle
pub const BOUND_THETA: usize = 3;
/// Charge over absolute momentum
pub const BOUND_QOVERP: usize = 4;
/// Time (in path-length units)
pub const BOUND_TIME: usize = 5;
/// Dimension of the bound parameter vector
pub const BOUND_SIZE: usize = 6;

// ============================================================================
// ALIASES
// ============================================================================

/// Bound track parameter vector.
pub type BoundVector = SVector<f64, BOUND_SIZE>;

/// Bound covariance / weight matrix.
pub type BoundSquareMatrix = SMatrix<f64, BOUND_SIZE, BOUND_SIZE>;

/// Bound-to-bound transport Jacobian.
pub type BoundMatrix = SMatrix<f64, BOUND_SIZE, BOUND_SIZE>;

/// 4D position `(x, y, z, t)`.
pub type Vector4 = nalgebra::Vector4<f64>;

/// 2×2 block, e.g. the (d0, z0) impact parameter covariance.
pub type SquareMatrix2 = Matrix2<f64>;

// ============================================================================
// DIRECTION HELPERS
// ============================================================================

/// Builds a unit direction from the azimuthal and polar angles.
#[inline]
pub fn make_direction_from_phi_theta(phi: f64, theta: f64) -> Vector3<f64> {
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_theta, cos_theta) = theta.sin_cos();
    Vector3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta)
}

/// Returns `(phi, theta)` of a (not necessarily normalised) direction.
///
/// Phi is reported as 0 for directions along the z axis, where it is
/// ill-defined.
pub fn phi_theta_from_direction(direction: &Vector3<f64>) -> (f64, f64) {
    let transverse = direction.x.hypot(direction.y);
    let theta = transverse.atan2(direction.z);
    let phi = if transverse > 0.0 {
        direction.y.atan2(direction.x)
    } else {
        0.0
    };
    (phi, theta)
}

// ============================================================================
// PERIODIC ANGLES
// ============================================================================

/// Wraps `value` into `[start, start + range)`.
#[inline]
pub fn wrap_periodic(value: f64, start: f64, range: f64) -> f64 {
    let diff = value - start;
    if (0.0..range).contains(&diff) {
        return value;
    }
    let wrapped = start + diff.rem_euclid(range);
    // rem_euclid can round up to exactly `range` for tiny negative inputs
    if wrapped >= start + range {
        start
    } else {
        wrapped
    }
}

/// Maps an angle into the symmetric interval `[-π, π)`.
#[inline]
pub fn radian_sym(angle: f64) -> f64 {
    wrap_periodic(angle, -PI, 2.0 * PI)
}

/// Difference `lhs - rhs` of two periodic values, chosen so that its
/// magnitude never exceeds half the period.
#[inline]
pub fn difference_periodic(lhs: f64, rhs: f64, range: f64) -> f64 {
    let mut delta = (lhs - rhs) % range;
    if 2.0 * delta < -range {
        delta += range;
    } else if range <= 2.0 * delta {
        delta -= range;
    }
    delta
}

/// Brings `(phi, theta)` back into `[-π, π) × [0, π]`.
///
/// A polar angle past either pole is reflected and the azimuth is turned by
/// half a revolution, which describes the same direction. Exactly on a pole
/// the azimuth is undefined and set to 0.
pub fn normalize_phi_theta(phi: f64, theta: f64) -> (f64, f64) {
    let (phi, theta) = if (0.0..=PI).contains(&theta) {
        (phi, theta)
    } else {
        let theta = wrap_periodic(theta, -PI, 2.0 * PI);
        if theta < 0.0 {
            (phi + PI, -theta)
        } else {
            (phi, theta)
        }
    };
    if theta == 0.0 || theta == PI {
        return (0.0, theta);
    }
    (radian_sym(phi), theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_direction_axes() {
        let x = make_direction_from_phi_theta(0.0, PI / 2.0);
        assert_relative_eq!(x, Vector3::x(), epsilon = 1e-15);

        let y = make_direction_from_phi_theta(PI / 2.0, PI / 2.0);
        assert_relative_eq!(y, Vector3::y(), epsilon = 1e-15);

        let z = make_direction_from_phi_theta(1.3, 0.0);
        assert_relative_eq!(z, Vector3::z(), epsilon = 1e-15);
    }

    #[test]
    fn test_phi_ill_defined_on_axis() {
        let (phi, theta) = phi_theta_from_direction(&Vector3::new(0.0, 0.0, -2.0));
        assert_eq!(phi, 0.0);
        assert_relative_eq!(theta, PI);
    }

    #[test]
    fn test_difference_periodic_across_boundary() {
        let d = difference_periodic(PI - 0.01, -PI + 0.01, 2.0 * PI);
        assert_relative_eq!(d, -0.02, epsilon = 1e-12);

        let d = difference_periodic(-PI + 0.01, PI - 0.01, 2.0 * PI);
        assert_relative_eq!(d, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_radian_sym_range() {
        assert_relative_eq!(radian_sym(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(radian_sym(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(radian_sym(PI), -PI, epsilon = 1e-12);
        assert_eq!(radian_sym(0.5), 0.5);
    }

    #[test]
    fn test_normalize_theta_past_pole() {
        let (phi, theta) = normalize_phi_theta(0.2, PI + 0.1);
        assert_relative_eq!(theta, PI - 0.1, epsilon = 1e-12);
        assert_relative_eq!(phi, 0.2 - PI, epsilon = 1e-12);

        let before = make_direction_from_phi_theta(0.2, PI + 0.1);
        let after = make_direction_from_phi_theta(phi, theta);
        assert_relative_eq!(before, after, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_zeroes_phi_at_poles() {
        assert_eq!(normalize_phi_theta(1.2, 0.0), (0.0, 0.0));
        assert_eq!(normalize_phi_theta(-2.5, PI), (0.0, PI));
        // -π wraps onto the backward pole
        assert_eq!(normalize_phi_theta(0.7, -PI).0, 0.0);
        assert_eq!(normalize_phi_theta(0.7, 0.5), (0.7, 0.5));
    }

    proptest! {
        #[test]
        fn prop_direction_round_trip(
            phi in -10.0f64..10.0,
            theta in 1e-3f64..(PI - 1e-3),
        ) {
            let dir = make_direction_from_phi_theta(phi, theta);
            prop_assert!((dir.norm() - 1.0).abs() < 1e-12);

            let (phi_back, theta_back) = phi_theta_from_direction(&dir);
            prop_assert!((theta_back - theta).abs() < 1e-9);
            prop_assert!(difference_periodic(phi_back, phi, 2.0 * PI).abs() < 1e-9);
        }

        #[test]
        fn prop_difference_periodic_is_bounded(a in -20.0f64..20.0, b in -20.0f64..20.0) {
            let d = difference_periodic(a, b, 2.0 * PI);
            prop_assert!(d.abs() <= PI + 1e-12);
            prop_assert!(difference_periodic(b + d, a, 2.0 * PI).abs() < 1e-9);
        }
    }
}
