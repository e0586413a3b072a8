//! Track parameters bound to a reference surface.

use crate::context::GeometryContext;
use crate::surface::{PlaneSurface, Surface};
use crate::types::{
    make_direction_from_phi_theta, normalize_phi_theta, phi_theta_from_direction, BoundSquareMatrix,
    BoundVector, SquareMatrix2, Vector4, BOUND_LOC0, BOUND_LOC1, BOUND_PHI, BOUND_QOVERP,
    BOUND_THETA, BOUND_TIME,
};
use nalgebra::{Vector2, Vector3};
use std::sync::Arc;

/// Track parameters expressed in the local frame of a reference surface.
///
/// The parameter vector is `[loc0, loc1, phi, theta, q/p, time]`; the
/// covariance is optional. Neutral tracks (absolute charge 0) store `1/p` in
/// the q/p slot.
#[derive(Debug, Clone)]
pub struct BoundTrackParameters {
    surface: Arc<dyn Surface>,
    parameters: BoundVector,
    covariance: Option<BoundSquareMatrix>,
    absolute_charge: f64,
}

impl BoundTrackParameters {
    /// Creates unit-charge parameters on `surface`.
    ///
    /// The direction angles are normalised into `[-π, π) × [0, π]`.
    pub fn new(
        surface: Arc<dyn Surface>,
        parameters: BoundVector,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        let mut params = Self {
            surface,
            parameters,
            covariance,
            absolute_charge: 1.0,
        };
        params.normalize_angles();
        params
    }

    /// Creates curvilinear parameters for a charged track.
    ///
    /// The reference surface is the plane through `pos4` whose normal is the
    /// track direction, so both local coordinates are zero.
    pub fn curvilinear(
        pos4: Vector4,
        direction: Vector3<f64>,
        q_over_p: f64,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        Self::curvilinear_with_charge(pos4, direction, q_over_p, 1.0, covariance)
    }

    /// Creates curvilinear parameters for a neutral track of momentum `p`.
    pub fn curvilinear_neutral(
        pos4: Vector4,
        direction: Vector3<f64>,
        p: f64,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        Self::curvilinear_with_charge(pos4, direction, 1.0 / p, 0.0, covariance)
    }

    /// Creates curvilinear parameters for an arbitrary charge `q`
    /// (zero allowed) and momentum `p`.
    pub fn curvilinear_any(
        pos4: Vector4,
        direction: Vector3<f64>,
        p: f64,
        q: f64,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        let q_over_p = if q != 0.0 { q / p } else { 1.0 / p };
        Self::curvilinear_with_charge(pos4, direction, q_over_p, q.abs(), covariance)
    }

    fn curvilinear_with_charge(
        pos4: Vector4,
        direction: Vector3<f64>,
        q_over_p: f64,
        absolute_charge: f64,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        let position = pos4.xyz();
        let unit = direction.normalize();
        let (phi, theta) = phi_theta_from_direction(&unit);
        let surface: Arc<dyn Surface> = Arc::new(PlaneSurface::curvilinear(position, unit));
        let parameters = BoundVector::from([0.0, 0.0, phi, theta, q_over_p, pos4.w]);
        Self {
            surface,
            parameters,
            covariance,
            absolute_charge,
        }
    }

    /// Returns a copy carrying a different absolute charge.
    pub fn with_absolute_charge(mut self, absolute_charge: f64) -> Self {
        self.absolute_charge = absolute_charge.abs();
        self
    }

    /// Replaces the reference surface, parameters and covariance while
    /// keeping the particle's charge.
    pub fn rebound(
        &self,
        surface: Arc<dyn Surface>,
        parameters: BoundVector,
        covariance: Option<BoundSquareMatrix>,
    ) -> Self {
        Self::new(surface, parameters, covariance).with_absolute_charge(self.absolute_charge)
    }

    // ========== Raw Access ==========

    /// The bound parameter vector.
    #[inline]
    pub fn parameters(&self) -> &BoundVector {
        &self.parameters
    }

    /// Adds `delta` to the parameter vector and re-normalises the angles.
    pub fn apply_delta(&mut self, delta: &BoundVector) {
        self.parameters += delta;
        self.normalize_angles();
    }

    /// The covariance, if the track carries one.
    #[inline]
    pub fn covariance(&self) -> Option<&BoundSquareMatrix> {
        self.covariance.as_ref()
    }

    /// Replaces (or removes) the covariance.
    pub fn set_covariance(&mut self, covariance: Option<BoundSquareMatrix>) {
        self.covariance = covariance;
    }

    /// The (d0, z0) block of the covariance, i.e. the upper-left 2×2 corner.
    pub fn spatial_impact_parameter_covariance(&self) -> Option<SquareMatrix2> {
        self.covariance
            .as_ref()
            .map(|cov| cov.fixed_view::<2, 2>(BOUND_LOC0, BOUND_LOC0).into_owned())
    }

    /// The reference surface.
    #[inline]
    pub fn reference_surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    // ========== Kinematics ==========

    /// Local coordinates on the reference surface.
    pub fn local_position(&self) -> Vector2<f64> {
        Vector2::new(self.parameters[BOUND_LOC0], self.parameters[BOUND_LOC1])
    }

    /// Global position.
    pub fn position(&self, gctx: &GeometryContext) -> Vector3<f64> {
        self.surface
            .local_to_global(gctx, &self.local_position(), &self.direction())
    }

    /// Global position and time.
    pub fn four_position(&self, gctx: &GeometryContext) -> Vector4 {
        let pos = self.position(gctx);
        Vector4::new(pos.x, pos.y, pos.z, self.time())
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.parameters[BOUND_TIME]
    }

    #[inline]
    pub fn phi(&self) -> f64 {
        self.parameters[BOUND_PHI]
    }

    #[inline]
    pub fn theta(&self) -> f64 {
        self.parameters[BOUND_THETA]
    }

    #[inline]
    pub fn q_over_p(&self) -> f64 {
        self.parameters[BOUND_QOVERP]
    }

    /// Unit direction vector.
    pub fn direction(&self) -> Vector3<f64> {
        make_direction_from_phi_theta(self.phi(), self.theta())
    }

    /// Absolute momentum.
    pub fn absolute_momentum(&self) -> f64 {
        if self.absolute_charge == 0.0 {
            1.0 / self.q_over_p()
        } else {
            self.absolute_charge / self.q_over_p().abs()
        }
    }

    /// Momentum component transverse to the z axis.
    pub fn transverse_momentum(&self) -> f64 {
        self.absolute_momentum() * self.theta().sin()
    }

    /// Momentum vector.
    pub fn momentum(&self) -> Vector3<f64> {
        self.direction() * self.absolute_momentum()
    }

    /// Signed charge.
    pub fn charge(&self) -> f64 {
        self.absolute_charge.copysign(self.q_over_p())
    }

    fn normalize_angles(&mut self) {
        let (phi, theta) = normalize_phi_theta(self.parameters[BOUND_PHI], self.parameters[BOUND_THETA]);
        self.parameters[BOUND_PHI] = phi;
        self.parameters[BOUND_THETA] = theta;
    }
}
