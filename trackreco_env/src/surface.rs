//! Surface contract and the two reference surfaces used by the fitter and
//! the linearizer.
//!
//! The contract is deliberately narrow: a surface knows where it is, how a
//! straight line meets it, and how to convert between its local frame and
//! global coordinates. Navigation, bounds and material belong to the
//! geometry engine and are not modelled here.

use crate::context::GeometryContext;
use crate::error::EnvError;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest |n·d| (or transverse direction norm) treated as non-parallel.
const PARALLEL_EPSILON: f64 = 1e-12;

// ============================================================================
// IDENTIFIER
// ============================================================================

/// Identifies a detector surface; measurements are keyed by it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GeometryIdentifier(pub u64);

impl fmt::Display for GeometryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

/// A detector or reference surface.
///
/// # Implementations
///
/// - [`PlaneSurface`]: planar detector modules and curvilinear frames
/// - [`PerigeeSurface`]: line along the global z axis, used to express
///   impact parameters relative to a point
pub trait Surface: fmt::Debug + Send + Sync {
    /// Identifier of this surface (0 for free-standing reference surfaces).
    fn geometry_id(&self) -> GeometryIdentifier;

    /// Global position of the surface origin.
    fn center(&self, gctx: &GeometryContext) -> Vector3<f64>;

    /// Surface normal (for line-like surfaces: the line direction).
    fn normal(&self, gctx: &GeometryContext) -> Vector3<f64>;

    /// Signed path length along `direction` from `position` to the surface,
    /// assuming straight-line motion.
    fn intersect(
        &self,
        gctx: &GeometryContext,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
    ) -> Result<f64, EnvError>;

    /// Converts local coordinates to a global position.
    ///
    /// `direction` is needed by surfaces whose local frame depends on the
    /// track direction (line surfaces).
    fn local_to_global(
        &self,
        gctx: &GeometryContext,
        local: &Vector2<f64>,
        direction: &Vector3<f64>,
    ) -> Vector3<f64>;

    /// Converts a global position to local coordinates.
    ///
    /// Fails with [`EnvError::NotOnSurface`] if the position is further than
    /// `tolerance` from the surface.
    fn global_to_local(
        &self,
        gctx: &GeometryContext,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        tolerance: f64,
    ) -> Result<Vector2<f64>, EnvError>;
}

// ============================================================================
// PLANE
// ============================================================================

/// Unbounded plane with a curvilinear local frame.
///
/// The local axes are `u = normalize(ẑ × n)` and `v = n × u`; for normals
/// close to the z axis `u` is built from ŷ instead.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSurface {
    id: GeometryIdentifier,
    center: Vector3<f64>,
    /// Columns: u, v, n
    rotation: Matrix3<f64>,
}

impl PlaneSurface {
    /// Creates a plane through `center` with the given normal.
    pub fn new(id: GeometryIdentifier, center: Vector3<f64>, normal: Vector3<f64>) -> Self {
        let n = normal.normalize();
        let u = if n.x.hypot(n.y) > 1e-6 {
            Vector3::new(-n.y, n.x, 0.0).normalize()
        } else {
            Vector3::y().cross(&n).normalize()
        };
        let v = n.cross(&u);
        Self {
            id,
            center,
            rotation: Matrix3::from_columns(&[u, v, n]),
        }
    }

    /// Creates the curvilinear frame at `position` for a track moving along
    /// `direction`.
    pub fn curvilinear(position: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self::new(GeometryIdentifier::default(), position, direction)
    }

    /// First local axis.
    pub fn u(&self) -> Vector3<f64> {
        self.rotation.column(0).into_owned()
    }

    /// Second local axis.
    pub fn v(&self) -> Vector3<f64> {
        self.rotation.column(1).into_owned()
    }
}

impl Surface for PlaneSurface {
    fn geometry_id(&self) -> GeometryIdentifier {
        self.id
    }

    fn center(&self, _gctx: &GeometryContext) -> Vector3<f64> {
        self.center
    }

    fn normal(&self, _gctx: &GeometryContext) -> Vector3<f64> {
        self.rotation.column(2).into_owned()
    }

    fn intersect(
        &self,
        gctx: &GeometryContext,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
    ) -> Result<f64, EnvError> {
        let n = self.normal(gctx);
        let denom = n.dot(direction);
        if denom.abs() < PARALLEL_EPSILON {
            return Err(EnvError::ParallelToSurface(self.id));
        }
        Ok(n.dot(&(self.center - position)) / denom)
    }

    fn local_to_global(
        &self,
        _gctx: &GeometryContext,
        local: &Vector2<f64>,
        _direction: &Vector3<f64>,
    ) -> Vector3<f64> {
        self.center + self.u() * local.x + self.v() * local.y
    }

    fn global_to_local(
        &self,
        gctx: &GeometryContext,
        position: &Vector3<f64>,
        _direction: &Vector3<f64>,
        tolerance: f64,
    ) -> Result<Vector2<f64>, EnvError> {
        let r = position - self.center;
        let distance = r.dot(&self.normal(gctx));
        if distance.abs() > tolerance {
            return Err(EnvError::NotOnSurface {
                surface: self.id,
                distance,
            });
        }
        Ok(Vector2::new(r.dot(&self.u()), r.dot(&self.v())))
    }
}

// ============================================================================
// PERIGEE
// ============================================================================

/// Line surface along the global z axis through a reference point.
///
/// Local coordinates are the signed transverse impact parameter `d0` along
/// `normalize(ẑ × d)` and the longitudinal offset `z0` from the reference
/// point. Positions are only on the surface at the point of closest approach.
#[derive(Debug, Clone, PartialEq)]
pub struct PerigeeSurface {
    id: GeometryIdentifier,
    center: Vector3<f64>,
}

impl PerigeeSurface {
    /// Creates a perigee surface through `center`.
    pub fn new(center: Vector3<f64>) -> Self {
        Self {
            id: GeometryIdentifier::default(),
            center,
        }
    }

    /// Creates a perigee surface with an explicit identifier.
    pub fn with_id(id: GeometryIdentifier, center: Vector3<f64>) -> Self {
        Self { id, center }
    }

    fn radial_axis(direction: &Vector3<f64>) -> Vector3<f64> {
        let axis = Vector3::z().cross(direction);
        let norm = axis.norm();
        if norm < PARALLEL_EPSILON {
            Vector3::x()
        } else {
            axis / norm
        }
    }
}

impl Surface for PerigeeSurface {
    fn geometry_id(&self) -> GeometryIdentifier {
        self.id
    }

    fn center(&self, _gctx: &GeometryContext) -> Vector3<f64> {
        self.center
    }

    fn normal(&self, _gctx: &GeometryContext) -> Vector3<f64> {
        Vector3::z()
    }

    fn intersect(
        &self,
        _gctx: &GeometryContext,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
    ) -> Result<f64, EnvError> {
        let r = position - self.center;
        let transverse_sq = direction.x * direction.x + direction.y * direction.y;
        if transverse_sq < PARALLEL_EPSILON {
            return Err(EnvError::ParallelToSurface(self.id));
        }
        Ok(-(r.x * direction.x + r.y * direction.y) / transverse_sq)
    }

    fn local_to_global(
        &self,
        _gctx: &GeometryContext,
        local: &Vector2<f64>,
        direction: &Vector3<f64>,
    ) -> Vector3<f64> {
        self.center + Vector3::z() * local.y + Self::radial_axis(direction) * local.x
    }

    fn global_to_local(
        &self,
        _gctx: &GeometryContext,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        tolerance: f64,
    ) -> Result<Vector2<f64>, EnvError> {
        let r = position - self.center;
        let radial = Self::radial_axis(direction);
        let d0 = r.dot(&radial);
        let off_plane = r - Vector3::z() * r.z - radial * d0;
        let distance = off_plane.norm();
        if distance > tolerance {
            return Err(EnvError::NotOnSurface {
                surface: self.id,
                distance,
            });
        }
        Ok(Vector2::new(d0, r.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_frame_is_orthonormal() {
        let plane = PlaneSurface::new(
            GeometryIdentifier(3),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(1.0, 0.2, -0.1),
        );
        let gctx = GeometryContext::default();
        let n = plane.normal(&gctx);

        assert_relative_eq!(plane.u().dot(&plane.v()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(plane.u().dot(&n), 0.0, epsilon = 1e-12);
        assert_relative_eq!(plane.v().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_along_x_uses_y_and_z() {
        let plane = PlaneSurface::new(GeometryIdentifier(1), Vector3::new(30.0, 0.0, 0.0), Vector3::x());
        assert_relative_eq!(plane.u(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(plane.v(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_plane_intersection_and_local_round_trip() {
        let gctx = GeometryContext::default();
        let plane = PlaneSurface::new(GeometryIdentifier(1), Vector3::new(30.0, 0.0, 0.0), Vector3::x());
        let dir = Vector3::new(1.0, 1.0, 0.0).normalize();

        let s = plane.intersect(&gctx, &Vector3::zeros(), &dir).unwrap();
        assert_relative_eq!(s, 30.0 * 2f64.sqrt(), epsilon = 1e-12);

        let hit = dir * s;
        let local = plane.global_to_local(&gctx, &hit, &dir, 1e-9).unwrap();
        assert_relative_eq!(local, Vector2::new(30.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(plane.local_to_global(&gctx, &local, &dir), hit, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_parallel_direction_fails() {
        let gctx = GeometryContext::default();
        let plane = PlaneSurface::new(GeometryIdentifier(9), Vector3::zeros(), Vector3::x());
        let err = plane.intersect(&gctx, &Vector3::new(-1.0, 0.0, 0.0), &Vector3::y());
        assert_eq!(err, Err(EnvError::ParallelToSurface(GeometryIdentifier(9))));
    }

    #[test]
    fn test_plane_off_surface_position_rejected() {
        let gctx = GeometryContext::default();
        let plane = PlaneSurface::new(GeometryIdentifier(2), Vector3::zeros(), Vector3::x());
        let res = plane.global_to_local(&gctx, &Vector3::new(0.1, 0.0, 0.0), &Vector3::x(), 1e-6);
        assert!(matches!(res, Err(EnvError::NotOnSurface { .. })));
    }

    #[test]
    fn test_perigee_closest_approach() {
        let gctx = GeometryContext::default();
        let perigee = PerigeeSurface::new(Vector3::new(0.0, 0.0, 5.0));

        // Line parallel to x at y = 2, starting at x = -10
        let start = Vector3::new(-10.0, 2.0, 7.0);
        let dir = Vector3::x();
        let s = perigee.intersect(&gctx, &start, &dir).unwrap();
        assert_relative_eq!(s, 10.0, epsilon = 1e-12);

        let pca = start + dir * s;
        let local = perigee.global_to_local(&gctx, &pca, &dir, 1e-9).unwrap();
        // ẑ × x̂ = ŷ, so d0 is +2
        assert_relative_eq!(local, Vector2::new(2.0, 2.0), epsilon = 1e-12);
        assert_relative_eq!(perigee.local_to_global(&gctx, &local, &dir), pca, epsilon = 1e-12);
    }

    #[test]
    fn test_perigee_rejects_beam_parallel_tracks() {
        let gctx = GeometryContext::default();
        let perigee = PerigeeSurface::new(Vector3::zeros());
        let res = perigee.intersect(&gctx, &Vector3::new(1.0, 0.0, 0.0), &Vector3::z());
        assert!(matches!(res, Err(EnvError::ParallelToSurface(_))));
    }
}
