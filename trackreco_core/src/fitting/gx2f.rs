//! Global chi-square track fitter (GX2F).
//!
//! A Gauss-Newton loop: each iteration propagates the current start
//! parameters through the navigation sequence, collects residuals,
//! measurement covariances and the Jacobians from the start surface at
//! every measurement, and solves the normal equations for a parameter
//! update.
//!
//! # Scope
//!
//! - Only (loc0, loc1, phi, theta) are fitted; q/p and time stay fixed.
//! - Measurements are two-dimensional and measure (loc0, loc1).
//! - No material effects; the scattering and energy-loss switches are
//!   carried in the options for callers but have no effect.

use crate::error::{RecoError, Result};
use crate::event_data::{
    local_projector, MeasurementCovariance, MeasurementVector, SourceLink, Track, TrackContainer,
    TrackStatePropMask, VectorTrajectory, MEAS_DIM,
};
use crate::fitting::components::{
    Calibrator, OutlierFinder, Smoother, Updater, VoidCalibrator, VoidOutlierFinder, VoidSmoother,
    VoidUpdater,
};
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info_span, trace, warn, Span};
use trackreco_env::{
    BoundMatrix, BoundSquareMatrix, BoundTrackParameters, BoundVector, CalibrationContext,
    GeometryContext, GeometryIdentifier, PropagationOutput, Propagator, PropagatorOptions, Surface,
};

/// Number of fitted parameters: loc0, loc1, phi, theta.
const REDUCED_SIZE: usize = 4;

/// Singular values below this fraction of the largest one count as zero.
const RANK_TOLERANCE: f64 = 1e-12;

type ReducedMatrix = SMatrix<f64, REDUCED_SIZE, REDUCED_SIZE>;
type ReducedVector = SVector<f64, REDUCED_SIZE>;

// ============================================================================
// OPTIONS & EXTENSIONS
// ============================================================================

/// Options for a single [`Gx2Fitter::fit`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gx2FitterOptions {
    pub geo_context: GeometryContext,
    pub calibration_context: CalibrationContext,

    /// Options for every surface-to-surface propagation
    pub propagator_options: PropagatorOptions,

    /// Reserved; no material effects are applied
    pub multiple_scattering: bool,
    /// Reserved; no material effects are applied
    pub energy_loss: bool,

    /// Number of Gauss-Newton iterations (default: 5)
    pub n_update_max: usize,

    /// Surfaces visited per iteration before navigation stops (default: 12)
    pub max_surface_crossings: usize,

    /// Stop early once the update norm drops below this value
    /// (default: None, always run `n_update_max` iterations)
    pub convergence_threshold: Option<f64>,
}

impl Default for Gx2FitterOptions {
    fn default() -> Self {
        Self {
            geo_context: GeometryContext::default(),
            calibration_context: CalibrationContext::default(),
            propagator_options: PropagatorOptions::default(),
            multiple_scattering: false,
            energy_loss: false,
            n_update_max: 5,
            max_surface_crossings: 12,
            convergence_threshold: None,
        }
    }
}

/// Strategies invoked per track state.
///
/// Defaults are the void components; the calibrator must always be
/// replaced.
#[derive(Clone, Copy)]
pub struct Gx2FitterExtensions<'a> {
    pub calibrator: &'a dyn Calibrator,
    pub updater: &'a dyn Updater,
    pub outlier_finder: &'a dyn OutlierFinder,
    pub smoother: &'a dyn Smoother,
}

impl<'a> Gx2FitterExtensions<'a> {
    /// Void components with the given calibrator.
    pub fn with_calibrator(calibrator: &'a dyn Calibrator) -> Self {
        Self {
            calibrator,
            ..Self::default()
        }
    }
}

impl Default for Gx2FitterExtensions<'_> {
    fn default() -> Self {
        Self {
            calibrator: &VoidCalibrator,
            updater: &VoidUpdater,
            outlier_finder: &VoidOutlierFinder,
            smoother: &VoidSmoother,
        }
    }
}

// ============================================================================
// PER-ITERATION RESULT
// ============================================================================

/// What one pass over the navigation sequence collected.
#[derive(Debug, Clone)]
pub struct Gx2FitterResult {
    pub last_measurement_index: Option<usize>,
    pub last_track_index: Option<usize>,

    pub measurement_states: usize,
    pub measurement_holes: usize,
    pub outlier_states: usize,
    pub processed_states: usize,

    /// Navigation stopped at the surface-crossing limit
    pub finished: bool,
    /// Measurement surfaces never reached
    pub missed_active_surfaces: Vec<GeometryIdentifier>,

    pub collector_residuals: Vec<MeasurementVector>,
    pub collector_covariance: Vec<MeasurementCovariance>,
    pub collector_jacobians: Vec<BoundMatrix>,

    pub jacobian_from_start: BoundMatrix,
    pub surface_count: usize,
}

impl Default for Gx2FitterResult {
    fn default() -> Self {
        Self {
            last_measurement_index: None,
            last_track_index: None,
            measurement_states: 0,
            measurement_holes: 0,
            outlier_states: 0,
            processed_states: 0,
            finished: false,
            missed_active_surfaces: Vec::new(),
            collector_residuals: Vec::new(),
            collector_covariance: Vec::new(),
            collector_jacobians: Vec::new(),
            jacobian_from_start: BoundMatrix::identity(),
            surface_count: 0,
        }
    }
}

/// Sums of the normal equations over all measurements of one iteration.
struct NormalEquations {
    a_matrix: BoundSquareMatrix,
    b_vector: BoundVector,
    chi2: f64,
}

impl NormalEquations {
    fn accumulate(result: &Gx2FitterResult) -> Result<Self> {
        let proj = local_projector();
        let mut eq = Self {
            a_matrix: BoundSquareMatrix::zeros(),
            b_vector: BoundVector::zeros(),
            chi2: 0.0,
        };

        let measurements = result
            .collector_residuals
            .iter()
            .zip(&result.collector_covariance)
            .zip(&result.collector_jacobians);
        for ((residual, covariance), jacobian) in measurements {
            let weight = covariance
                .try_inverse()
                .ok_or_else(|| RecoError::singular("measurement covariance"))?;
            let projected = proj * jacobian;

            eq.chi2 += (residual.transpose() * weight * residual)[(0, 0)];
            eq.a_matrix += projected.transpose() * weight * projected;
            eq.b_vector += projected.transpose() * weight * residual;
        }
        Ok(eq)
    }

    fn reduced(&self) -> (ReducedMatrix, ReducedVector) {
        (
            self.a_matrix.fixed_view::<REDUCED_SIZE, REDUCED_SIZE>(0, 0).into_owned(),
            self.b_vector.fixed_rows::<REDUCED_SIZE>(0).into_owned(),
        )
    }
}

/// Solves `a · x = b` via SVD, treating tiny singular values as zero.
///
/// Returns the (pseudo-inverse) solution and the numerical rank of `a`.
fn solve_reduced(a: &ReducedMatrix, b: &ReducedVector) -> Result<(ReducedVector, usize)> {
    let svd = a.svd(true, true);
    let tolerance = svd.singular_values.max() * RANK_TOLERANCE;
    let rank = svd.rank(tolerance);
    let solution = svd.solve(b, tolerance).map_err(RecoError::singular)?;
    Ok((solution, rank))
}

// ============================================================================
// FITTER
// ============================================================================

/// Global chi-square fitter over a propagator `P`.
pub struct Gx2Fitter<P> {
    propagator: P,
    span: Span,
    actor_span: Span,
}

impl<P: Propagator> Gx2Fitter<P> {
    pub fn new(propagator: P) -> Self {
        Self::with_span(propagator, info_span!("Gx2Fitter"))
    }

    /// Creates a fitter logging into `span`; the per-surface pass logs into
    /// a child span named "Actor".
    pub fn with_span(propagator: P, span: Span) -> Self {
        let actor_span = info_span!(parent: &span, "Actor");
        Self {
            propagator,
            span,
            actor_span,
        }
    }

    pub fn propagator(&self) -> &P {
        &self.propagator
    }

    /// Fits `start` to the measurements behind `source_links`.
    ///
    /// `navigation` is the ordered sequence of surfaces the track crosses;
    /// surfaces without a source link are passed through. The fitted track
    /// is appended to `tracks` and its index returned.
    ///
    /// # Errors
    ///
    /// - [`RecoError::Configuration`] if `n_update_max` is 0
    /// - [`RecoError::NoMeasurements`] if no source link lies on a navigated surface
    /// - [`RecoError::Propagation`] if any propagation fails
    /// - [`RecoError::SingularSystem`] if the final information matrix is singular
    pub fn fit<I>(
        &self,
        source_links: I,
        start: &BoundTrackParameters,
        options: &Gx2FitterOptions,
        extensions: &Gx2FitterExtensions<'_>,
        navigation: &[Arc<dyn Surface>],
        tracks: &mut TrackContainer,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = SourceLink>,
    {
        let _guard = self.span.enter();

        if options.n_update_max == 0 {
            return Err(RecoError::config("n_update_max must be at least 1"));
        }

        let input_measurements: BTreeMap<GeometryIdentifier, SourceLink> = source_links
            .into_iter()
            .map(|sl| (sl.geometry_id, sl))
            .collect();
        debug!(count = input_measurements.len(), "prepared input measurements");
        if input_measurements.is_empty() {
            return Err(RecoError::NoMeasurements);
        }

        let mut params = start.clone();
        let mut delta_params = BoundVector::zeros();
        let mut reduced_matrix = ReducedMatrix::zeros();
        let mut last_rank = REDUCED_SIZE;
        let mut rank_deficient = false;
        let mut tip = None;
        let mut n_iterations = 0;

        debug!("start to iterate");
        for n_update in 0..options.n_update_max {
            trace!(iteration = n_update + 1, of = options.n_update_max, "next iteration");
            params.apply_delta(&delta_params);

            let result = self.run_actor(
                &params,
                &input_measurements,
                options,
                extensions,
                navigation,
                tracks.trajectory_mut(),
            )?;
            n_iterations += 1;
            if result.measurement_states == 0 {
                return Err(RecoError::NoMeasurements);
            }
            tip = result.last_track_index;

            let equations = NormalEquations::accumulate(&result)?;
            let (a_reduced, b_reduced) = equations.reduced();
            let (delta_reduced, rank) = solve_reduced(&a_reduced, &b_reduced)?;
            if rank < REDUCED_SIZE {
                warn!(rank, iteration = n_update + 1, "reduced information matrix is rank deficient");
                rank_deficient = true;
            }
            reduced_matrix = a_reduced;
            last_rank = rank;

            delta_params = BoundVector::zeros();
            delta_params
                .fixed_rows_mut::<REDUCED_SIZE>(0)
                .copy_from(&delta_reduced);

            debug!(
                iteration = n_update + 1,
                chi2 = equations.chi2,
                measurements = result.measurement_states,
                delta_norm = delta_params.norm(),
                "iteration done"
            );

            if let Some(threshold) = options.convergence_threshold {
                if delta_params.norm() < threshold {
                    debug!(iteration = n_update + 1, "converged");
                    break;
                }
            }
        }
        debug!("finished to iterate");

        // Finalization: covariance from the last information matrix
        if last_rank < REDUCED_SIZE {
            return Err(RecoError::singular(format!(
                "information matrix has rank {last_rank}"
            )));
        }
        let reduced_covariance = reduced_matrix
            .try_inverse()
            .ok_or_else(|| RecoError::singular("information matrix"))?;
        let mut full_covariance = BoundSquareMatrix::identity();
        full_covariance
            .fixed_view_mut::<REDUCED_SIZE, REDUCED_SIZE>(0, 0)
            .copy_from(&reduced_covariance);
        params.set_covariance(Some(full_covariance));

        if let Some(tip) = tip {
            extensions
                .smoother
                .smooth(&options.geo_context, tracks.trajectory_mut(), tip)?;
        }

        let mut track = Track::new(params, tip);
        track.n_iterations = n_iterations;
        track.rank_deficient = rank_deficient;
        track.calculate_track_quantities(tracks.trajectory());
        debug!(
            chi2 = track.chi2,
            ndf = track.ndf,
            holes = track.n_holes,
            outliers = track.n_outliers,
            "fitted track"
        );

        Ok(tracks.add_track(track))
    }

    /// One pass over the navigation sequence with fixed start parameters.
    fn run_actor(
        &self,
        start: &BoundTrackParameters,
        input_measurements: &BTreeMap<GeometryIdentifier, SourceLink>,
        options: &Gx2FitterOptions,
        extensions: &Gx2FitterExtensions<'_>,
        navigation: &[Arc<dyn Surface>],
        trajectory: &mut VectorTrajectory,
    ) -> Result<Gx2FitterResult> {
        let _guard = self.actor_span.enter();
        let gctx = &options.geo_context;
        let mut result = Gx2FitterResult::default();
        let mut current = start.clone();
        // Surfaces without measurement since the last measurement; they
        // only become holes once another measurement follows
        let mut pending_holes: Vec<(Arc<dyn Surface>, PropagationOutput)> = Vec::new();
        let mut visited = Vec::new();

        for surface in navigation {
            if result.surface_count >= options.max_surface_crossings {
                warn!(
                    limit = options.max_surface_crossings,
                    "surface crossing limit reached, result might be incomplete"
                );
                result.finished = true;
                break;
            }

            let output = self
                .propagator
                .propagate(gctx, &current, surface, &options.propagator_options)?;
            result.jacobian_from_start = output.jacobian * result.jacobian_from_start;
            result.surface_count += 1;

            let geometry_id = surface.geometry_id();
            trace!(surface = %geometry_id, "surface detected");

            if let Some(source_link) = input_measurements.get(&geometry_id) {
                visited.push(geometry_id);
                for (hole_surface, hole_output) in pending_holes.drain(..) {
                    let index = trajectory.add_track_state(
                        TrackStatePropMask::PREDICTED | TrackStatePropMask::JACOBIAN,
                        result.last_track_index,
                    );
                    let state = &mut trajectory[index];
                    state.reference_surface = Some(hole_surface);
                    state.predicted = Some(*hole_output.end_parameters.parameters());
                    state.predicted_covariance = hole_output.end_parameters.covariance().copied();
                    state.jacobian = Some(hole_output.jacobian);
                    state.path_length = hole_output.path_length;
                    state.type_flags.hole = true;
                    result.last_track_index = Some(index);
                    result.measurement_holes += 1;
                }

                let index =
                    trajectory.add_track_state(TrackStatePropMask::ALL, result.last_track_index);
                let state = &mut trajectory[index];
                let predicted = *output.end_parameters.parameters();
                state.reference_surface = Some(Arc::clone(surface));
                state.source_link = Some(*source_link);
                state.predicted = Some(predicted);
                state.predicted_covariance = output.end_parameters.covariance().copied();
                state.jacobian = Some(output.jacobian);
                state.path_length = output.path_length;

                extensions.calibrator.calibrate(
                    gctx,
                    &options.calibration_context,
                    source_link,
                    state,
                )?;
                let measurement = state.calibrated.unwrap_or_else(MeasurementVector::zeros);
                let covariance = state
                    .calibrated_covariance
                    .unwrap_or_else(MeasurementCovariance::zeros);
                let residual = measurement - predicted.fixed_rows::<MEAS_DIM>(0);
                let weight = covariance
                    .try_inverse()
                    .ok_or_else(|| RecoError::singular("measurement covariance"))?;
                state.chi2 = (residual.transpose() * weight * residual)[(0, 0)];
                trace!(?measurement, ?residual, "measurement in actor");

                extensions
                    .updater
                    .update(gctx, state, options.propagator_options.direction)?;

                if extensions.outlier_finder.is_outlier(state) {
                    debug!(surface = %geometry_id, chi2 = state.chi2, "outlier");
                    state.type_flags.outlier = true;
                    result.outlier_states += 1;
                } else {
                    state.type_flags.measurement = true;
                    result.measurement_states += 1;
                    result.collector_residuals.push(residual);
                    result.collector_covariance.push(covariance);
                    result.collector_jacobians.push(result.jacobian_from_start);
                }

                result.last_measurement_index = Some(index);
                result.last_track_index = Some(index);
                result.processed_states += 1;
            } else if result.last_measurement_index.is_some() {
                pending_holes.push((Arc::clone(surface), output.clone()));
            }

            current = output.end_parameters;
        }

        result.missed_active_surfaces = input_measurements
            .keys()
            .filter(|id| !visited.contains(*id))
            .copied()
            .collect();
        if !result.missed_active_surfaces.is_empty() {
            debug!(missed = ?result.missed_active_surfaces, "measurement surfaces not reached");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_data::Measurement;
    use crate::fitting::components::{Chi2OutlierFinder, PassThroughCalibrator};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use trackreco_env::{
        make_direction_from_phi_theta, PlaneSurface, StraightLinePropagator, Vector4, BOUND_LOC0,
        BOUND_LOC1, BOUND_PHI, BOUND_THETA,
    };

    const PHI: f64 = 0.05;
    const THETA: f64 = 1.5;

    fn plane(x: f64, id: u64) -> Arc<dyn Surface> {
        Arc::new(PlaneSurface::new(GeometryIdentifier(id), Vector3::new(x, 0.0, 0.0), Vector3::x()))
    }

    fn telescope() -> Vec<Arc<dyn Surface>> {
        (1..=10).map(|i| plane(30.0 * i as f64, i)).collect()
    }

    fn truth() -> BoundTrackParameters {
        let dir = make_direction_from_phi_theta(PHI, THETA);
        BoundTrackParameters::curvilinear(Vector4::new(0.0, 0.5, -1.0, 0.0), dir, 0.1, None)
    }

    /// Exact hits of the truth track on every surface, optionally displaced.
    fn measure(surfaces: &[Arc<dyn Surface>], shift: impl Fn(u64) -> f64) -> (Vec<Measurement>, Vec<SourceLink>) {
        let gctx = GeometryContext::default();
        let propagator = StraightLinePropagator::new();
        let truth = truth();
        let mut measurements = Vec::new();
        let mut links = Vec::new();
        for surface in surfaces {
            let out = propagator
                .propagate(&gctx, &truth, surface, &PropagatorOptions::default())
                .unwrap();
            let id = surface.geometry_id();
            let local = MeasurementVector::new(
                out.end_parameters.parameters()[BOUND_LOC0] + shift(id.0),
                out.end_parameters.parameters()[BOUND_LOC1],
            );
            links.push(SourceLink::new(id, measurements.len()));
            measurements.push(Measurement::new(id, local, MeasurementCovariance::identity() * 0.01));
        }
        (measurements, links)
    }

    fn perturbed_start() -> BoundTrackParameters {
        let mut start = truth();
        start.apply_delta(&BoundVector::from([0.3, -0.2, 0.004, -0.003, 0.0, 0.0]));
        start
    }

    fn fitter() -> Gx2Fitter<StraightLinePropagator> {
        Gx2Fitter::new(StraightLinePropagator::new())
    }

    #[test]
    fn test_fixed_point_has_zero_residual_and_update() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let options = Gx2FitterOptions {
            n_update_max: 2,
            ..Gx2FitterOptions::default()
        };
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &options, &extensions, &surfaces, &mut tracks)
            .unwrap();
        let track = &tracks.tracks()[idx];

        assert_relative_eq!(track.parameters.parameters(), truth().parameters(), epsilon = 1e-9);
        assert!(track.chi2 < 1e-12);
        assert_eq!(track.n_measurements, 10);
        assert_eq!(track.ndf, 20);
        assert_eq!(track.n_iterations, 2);
        assert!(!track.rank_deficient);

        // Two iterations of ten states each, appended to the same arena
        assert_eq!(tracks.trajectory().len(), 20);
        assert_eq!(tracks.trajectory().iter_backwards(track.tip_index.unwrap()).count(), 10);
    }

    #[test]
    fn test_perturbed_start_converges() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &perturbed_start(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks)
            .unwrap();
        let fitted = tracks.tracks()[idx].parameters.parameters();
        let expected = truth();

        assert_relative_eq!(fitted[BOUND_LOC0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(fitted[BOUND_LOC1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(fitted[BOUND_PHI], expected.phi(), epsilon = 1e-8);
        assert_relative_eq!(fitted[BOUND_THETA], expected.theta(), epsilon = 1e-8);
        assert!(tracks.tracks()[idx].chi2 < 1e-6);
    }

    #[test]
    fn test_covariance_is_inverse_information_in_fitted_block() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks)
            .unwrap();
        let cov = tracks.tracks()[idx].parameters.covariance().unwrap();

        // Position resolution at the start is better than a single hit
        assert!(cov[(0, 0)] > 0.0 && cov[(0, 0)] < 0.01);
        assert!(cov[(2, 2)] > 0.0 && cov[(2, 2)] < 1e-4);
        assert_eq!(cov[(4, 4)], 1.0);
        assert_eq!(cov[(5, 5)], 1.0);
        assert_eq!(cov[(0, 4)], 0.0);
    }

    #[test]
    fn test_convergence_threshold_stops_early() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let options = Gx2FitterOptions {
            n_update_max: 50,
            convergence_threshold: Some(1e-9),
            ..Gx2FitterOptions::default()
        };
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &perturbed_start(), &options, &extensions, &surfaces, &mut tracks)
            .unwrap();
        assert!(tracks.tracks()[idx].n_iterations < 50);
    }

    #[test]
    fn test_holes_between_measurements_are_counted() {
        let mut surfaces = telescope();
        // A passive surface before, between and after the measurements
        surfaces.insert(0, plane(10.0, 100));
        surfaces.insert(5, plane(125.0, 101));
        surfaces.push(plane(310.0, 102));
        let (measurements, links) = measure(&telescope(), |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let options = Gx2FitterOptions {
            max_surface_crossings: 20,
            ..Gx2FitterOptions::default()
        };
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &options, &extensions, &surfaces, &mut tracks)
            .unwrap();
        let track = &tracks.tracks()[idx];
        assert_eq!(track.n_holes, 1);
        assert_eq!(track.n_measurements, 10);
    }

    #[test]
    fn test_surface_limit_stops_navigation() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let options = Gx2FitterOptions {
            max_surface_crossings: 4,
            ..Gx2FitterOptions::default()
        };
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &options, &extensions, &surfaces, &mut tracks)
            .unwrap();
        assert_eq!(tracks.tracks()[idx].n_measurements, 4);
    }

    #[test]
    fn test_outlier_is_excluded() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |id| if id == 6 { 5.0 } else { 0.0 });
        let calibrator = PassThroughCalibrator::new(&measurements);
        let outlier_finder = Chi2OutlierFinder { max_chi2: 100.0 };
        let extensions = Gx2FitterExtensions {
            outlier_finder: &outlier_finder,
            ..Gx2FitterExtensions::with_calibrator(&calibrator)
        };
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks)
            .unwrap();
        let track = &tracks.tracks()[idx];

        assert_eq!(track.n_outliers, 1);
        assert_eq!(track.n_measurements, 9);
        assert_eq!(track.ndf, 18);
        assert_relative_eq!(track.parameters.parameters(), truth().parameters(), epsilon = 1e-9);
    }

    #[test]
    fn test_states_are_smoothed() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();

        let idx = fitter()
            .fit(links, &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks)
            .unwrap();
        let tip = tracks.tracks()[idx].tip_index.unwrap();
        for (_, state) in tracks.trajectory().iter_backwards(tip) {
            assert!(state.smoothed.is_some());
            assert_eq!(state.smoothed, state.predicted);
        }
    }

    #[test]
    fn test_single_measurement_is_singular() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();

        let res = fitter().fit(
            links.into_iter().take(1),
            &truth(),
            &Gx2FitterOptions::default(),
            &extensions,
            &surfaces,
            &mut tracks,
        );
        assert!(matches!(res, Err(RecoError::SingularSystem(_))));
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_invalid_inputs() {
        let surfaces = telescope();
        let (measurements, links) = measure(&surfaces, |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();
        let fitter = fitter();

        let zero_updates = Gx2FitterOptions {
            n_update_max: 0,
            ..Gx2FitterOptions::default()
        };
        let res = fitter.fit(links.clone(), &truth(), &zero_updates, &extensions, &surfaces, &mut tracks);
        assert!(matches!(res, Err(RecoError::Configuration(_))));

        let res = fitter.fit(Vec::new(), &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks);
        assert_eq!(res, Err(RecoError::NoMeasurements));

        let elsewhere = vec![SourceLink::new(GeometryIdentifier(999), 0)];
        let res = fitter.fit(elsewhere, &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks);
        assert_eq!(res, Err(RecoError::NoMeasurements));
    }

    #[test]
    fn test_propagation_failure_fails_the_fit() {
        let mut surfaces = telescope();
        surfaces.insert(3, plane(-50.0, 50));
        let (measurements, links) = measure(&telescope(), |_| 0.0);
        let calibrator = PassThroughCalibrator::new(&measurements);
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let mut tracks = TrackContainer::new();

        let res = fitter().fit(links, &truth(), &Gx2FitterOptions::default(), &extensions, &surfaces, &mut tracks);
        assert!(matches!(res, Err(RecoError::Propagation(_))));
    }
}
