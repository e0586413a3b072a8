//! Ground truth oracle for simulation.
//!
//! The Oracle owns the truth of a synthetic event:
//! - Straight-line particles emitted from vertices on the beam axis
//! - Noisy measurements on every telescope plane
//! - Smeared start parameters for the fit
//!
//! All randomness comes from a single seeded ChaCha8 stream, so an event is
//! fully determined by the seed and the sequence of calls.

use crate::detector::Detector;
use crate::error::SimError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use trackreco_core::event_data::{Measurement, MeasurementVector, SourceLink};
use trackreco_env::{
    make_direction_from_phi_theta, BoundTrackParameters, BoundVector, GeometryContext,
    Propagator, PropagatorOptions, StraightLinePropagator, Vector4, BOUND_LOC0, BOUND_LOC1,
};

/// A truth particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthParticle {
    /// Unique particle ID
    pub id: u64,

    /// Index of the vertex the particle comes from
    pub vertex_index: usize,

    /// Production point [x, y, z, t]
    pub vertex: Vector4,

    pub phi: f64,
    pub theta: f64,
    pub q_over_p: f64,
}

impl TruthParticle {
    /// Curvilinear parameters at the production point.
    pub fn parameters(&self) -> BoundTrackParameters {
        BoundTrackParameters::curvilinear(
            self.vertex,
            make_direction_from_phi_theta(self.phi, self.theta),
            self.q_over_p,
            None,
        )
    }
}

/// Everything the reconstruction gets to see of one particle.
#[derive(Debug, Clone)]
pub struct SimulatedTrack {
    pub truth: TruthParticle,

    /// Smeared parameters on the detector's start plane
    pub start: BoundTrackParameters,

    /// One link per measuring plane, into [`Oracle::measurements`]
    pub source_links: Vec<SourceLink>,
}

/// The Oracle - generates truth particles and their measurements.
pub struct Oracle {
    /// Master seed
    seed: u64,

    /// RNG for every random draw
    rng: ChaCha8Rng,

    /// Spread of phi and theta around the +x axis (rad)
    angular_spread: f64,

    /// Start parameter smearing in multiples of the resolution
    start_smearing: f64,

    propagator: StraightLinePropagator,
    measurements: Vec<Measurement>,
    next_id: u64,
}

impl Oracle {
    /// Creates a new Oracle with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            angular_spread: 0.1,
            start_smearing: 5.0,
            propagator: StraightLinePropagator::new(),
            measurements: Vec::new(),
            next_id: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sets the spread of the emission angles.
    pub fn set_angular_spread(&mut self, spread: f64) -> Result<(), SimError> {
        if !(0.0..FRAC_PI_2).contains(&spread) {
            return Err(SimError::Config(format!("angular spread {spread} outside [0, pi/2)")));
        }
        self.angular_spread = spread;
        Ok(())
    }

    /// All measurements generated so far; source links index into this.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Draws a Gaussian with the given sigma.
    fn gauss(&mut self, sigma: f64) -> f64 {
        let unit: f64 = self.rng.sample(StandardNormal);
        sigma * unit
    }

    /// Draws a uniform vertex z position in `[-half_range, half_range]`.
    pub fn sample_vertex_z(&mut self, half_range: f64) -> f64 {
        if half_range <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-half_range..=half_range)
    }

    /// Emits a particle from (0, 0, `vertex_z`) and measures it on every
    /// plane of `detector`.
    pub fn generate_track(
        &mut self,
        detector: &Detector,
        vertex_index: usize,
        vertex_z: f64,
    ) -> Result<SimulatedTrack, SimError> {
        let gctx = GeometryContext::default();
        let options = PropagatorOptions::default();

        let truth = TruthParticle {
            id: self.next_id,
            vertex_index,
            vertex: Vector4::new(0.0, 0.0, vertex_z, 0.0),
            phi: self.gauss(self.angular_spread),
            theta: FRAC_PI_2 + self.gauss(self.angular_spread),
            q_over_p: 0.1,
        };
        self.next_id += 1;
        let truth_params = truth.parameters();

        let resolution = detector.config().resolution;
        let covariance = detector.measurement_covariance();
        let mut source_links = Vec::with_capacity(detector.planes().len());
        for plane in detector.planes() {
            let hit = self.propagator.propagate(&gctx, &truth_params, plane, &options)?;
            let local = hit.end_parameters.parameters();
            let measured = MeasurementVector::new(
                local[BOUND_LOC0] + self.gauss(resolution),
                local[BOUND_LOC1] + self.gauss(resolution),
            );
            let id = plane.geometry_id();
            source_links.push(SourceLink::new(id, self.measurements.len()));
            self.measurements.push(Measurement::new(id, measured, covariance));
        }

        let mut start = self
            .propagator
            .propagate(&gctx, &truth_params, detector.start_surface(), &options)?
            .end_parameters;
        let position_sigma = self.start_smearing * resolution;
        let angle_sigma = self.start_smearing * resolution / detector.config().plane_spacing;
        let smear = BoundVector::from([
            self.gauss(position_sigma),
            self.gauss(position_sigma),
            self.gauss(angle_sigma),
            self.gauss(angle_sigma),
            0.0,
            0.0,
        ]);
        start.apply_delta(&smear);

        Ok(SimulatedTrack {
            truth,
            start,
            source_links,
        })
    }

    /// Generates `count` particles from one vertex.
    pub fn generate_vertex(
        &mut self,
        detector: &Detector,
        vertex_index: usize,
        vertex_z: f64,
        count: usize,
    ) -> Result<Vec<SimulatedTrack>, SimError> {
        (0..count)
            .map(|_| self.generate_track(detector, vertex_index, vertex_z))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_same_seed_same_event() {
        let detector = Detector::default();
        let mut a = Oracle::new(7);
        let mut b = Oracle::new(7);

        let ta = a.generate_track(&detector, 0, 1.5).unwrap();
        let tb = b.generate_track(&detector, 0, 1.5).unwrap();

        assert_eq!(ta.truth.phi, tb.truth.phi);
        assert_eq!(ta.start.parameters(), tb.start.parameters());
        assert_eq!(
            a.measurements().iter().map(|m| m.local).collect::<Vec<_>>(),
            b.measurements().iter().map(|m| m.local).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_measurements_follow_truth() {
        let detector = Detector::default();
        let mut oracle = Oracle::new(3);
        let track = oracle.generate_track(&detector, 0, -4.0).unwrap();

        assert_eq!(track.source_links.len(), detector.planes().len());
        let dir = make_direction_from_phi_theta(track.truth.phi, track.truth.theta);
        for (link, plane) in track.source_links.iter().zip(detector.planes()) {
            let measurement = &oracle.measurements()[link.index];
            assert_eq!(measurement.geometry_id, plane.geometry_id());

            // Local frame of a +x plane is (y, z)
            let x = plane.center(&GeometryContext::default()).x;
            let s = x / dir.x;
            let expected_y = s * dir.y;
            let expected_z = -4.0 + s * dir.z;
            assert!((measurement.local[0] - expected_y).abs() < 0.5);
            assert!((measurement.local[1] - expected_z).abs() < 0.5);
        }
    }

    #[test]
    fn test_start_parameters_are_near_vertex() {
        let detector = Detector::default();
        let mut oracle = Oracle::new(11);
        let track = oracle.generate_track(&detector, 0, 2.0).unwrap();

        let start = &track.start;
        assert_eq!(start.reference_surface().geometry_id(), detector.start_surface().geometry_id());
        let position = start.position(&GeometryContext::default());
        assert_relative_eq!(position.x, 0.0, epsilon = 1e-9);
        assert!((position.z - 2.0).abs() < 2.0);
        assert!((start.phi() - track.truth.phi).abs() < 0.1);
    }

    #[test]
    fn test_vertex_z_range() {
        let mut oracle = Oracle::new(5);
        for _ in 0..100 {
            let z = oracle.sample_vertex_z(10.0);
            assert!((-10.0..=10.0).contains(&z));
        }
        assert_eq!(oracle.sample_vertex_z(0.0), 0.0);
    }

    #[test]
    fn test_invalid_angular_spread() {
        let mut oracle = Oracle::new(1);
        assert!(oracle.set_angular_spread(2.0).is_err());
        assert!(oracle.set_angular_spread(0.05).is_ok());
    }
}
