//! Scenario runner - executes reconstruction scenarios on synthetic events.

use crate::detector::{Detector, DetectorConfig};
use crate::error::SimError;
use crate::oracle::{Oracle, SimulatedTrack};
use crate::scenarios::{ScenarioConfig, ScenarioId};

use nalgebra::Vector3;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trackreco_core::vertexing::{MainGridVector, TrackGridContribution};
use trackreco_core::{
    GaussianGridTrackDensity, Gx2Fitter, Gx2FitterExtensions, Gx2FitterOptions, LinearizerConfig,
    NumericalTrackLinearizer, PassThroughCalibrator, TrackContainer,
};
use trackreco_env::{
    BoundTrackParameters, Direction, GeometryContext, PerigeeSurface, Propagator,
    PropagatorOptions, StraightLinePropagator, Surface, Vector4, BOUND_LOC0, BOUND_LOC1,
};

/// Density grid used by every scenario: 2000 bins over ±100 mm.
type Density = GaussianGridTrackDensity<2000, 15>;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Truth particles generated
    pub tracks_generated: usize,

    /// Tracks the fitter returned
    pub tracks_fitted: usize,

    /// Fits that returned an error
    pub fit_failures: usize,

    /// Mean chi2/ndf over fitted tracks
    pub mean_chi2_per_ndf: f64,

    /// Largest |phi_fit - phi_true| (rad)
    pub max_phi_residual: f64,

    /// Vertices found on the density grid
    pub vertices_found: usize,

    /// Largest |z_found - z_true| (mm)
    pub max_z_residual: f64,

    /// Width of the first seed (mm)
    pub seed_width: f64,

    /// Tracks linearized at the seed
    pub tracks_linearized: usize,

    /// Largest |d0| / sigma(d0) at the seed
    pub max_impact_pull: f64,
}

/// A fitted track next to the particle it came from.
struct FittedTrack<'a> {
    simulated: &'a SimulatedTrack,
    parameters: BoundTrackParameters,
}

/// Runs reconstruction scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Event composition and pass criteria
    config: ScenarioConfig,

    /// Telescope layout
    detector_config: DetectorConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: ScenarioConfig::default(),
            detector_config: DetectorConfig::default(),
        }
    }

    /// Replaces the scenario configuration.
    pub fn with_config(mut self, config: ScenarioConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the detector layout.
    pub fn with_detector(mut self, detector_config: DetectorConfig) -> Self {
        self.detector_config = detector_config;
        self
    }

    /// Sets the number of tracks per vertex.
    pub fn with_tracks(mut self, tracks: usize) -> Self {
        self.config.tracks_per_vertex = tracks;
        self
    }

    /// Sets the measurement resolution.
    pub fn with_noise(mut self, sigma: f64) -> Self {
        self.detector_config.resolution = sigma;
        self
    }

    /// Sets the number of fitter iterations.
    pub fn with_iterations(mut self, n: usize) -> Self {
        self.config.n_iterations = n;
        self
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut metrics = ScenarioMetrics::default();
        let outcome = self.validate().and_then(|()| match scenario {
            ScenarioId::TelescopeFit => self.run_telescope_fit(&mut metrics),
            ScenarioId::SingleVertex => self.run_single_vertex(&mut metrics),
            ScenarioId::TwoVertices => self.run_two_vertices(&mut metrics),
            ScenarioId::Linearize => self.run_linearize(&mut metrics),
        });

        let failure_reason = outcome.err().map(|e| e.to_string());
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            failure_reason,
            metrics,
        }
    }

    fn validate(&self) -> Result<(), SimError> {
        if self.config.tracks_per_vertex == 0 {
            return Err(SimError::Config("at least one track per vertex is required".into()));
        }
        if !(self.detector_config.resolution > 0.0) {
            return Err(SimError::Config(format!(
                "resolution must be positive, got {}",
                self.detector_config.resolution
            )));
        }
        if self.detector_config.n_planes < 2 {
            return Err(SimError::Config("a straight-line fit needs at least 2 planes".into()));
        }
        Ok(())
    }

    /// RECO-001: TelescopeFit - GX2F on single tracks.
    ///
    /// **Assertion**: every fit succeeds, mean chi2/ndf below the configured
    /// limit and fitted phi within 10 mrad of the truth.
    fn run_telescope_fit(&self, metrics: &mut ScenarioMetrics) -> Result<(), SimError> {
        info!("RECO-001: TelescopeFit");

        let detector = Detector::new(self.detector_config.clone());
        let mut oracle = Oracle::new(self.seed);
        let vertex_z = oracle.sample_vertex_z(self.config.vertex_z_range);
        let simulated =
            oracle.generate_vertex(&detector, 0, vertex_z, self.config.tracks_per_vertex)?;
        metrics.tracks_generated = simulated.len();

        let fitted = self.fit_all(&detector, &oracle, &simulated, metrics)?;
        if metrics.fit_failures > 0 {
            return Err(SimError::Assertion(format!(
                "{}/{} fits failed",
                metrics.fit_failures, metrics.tracks_generated
            )));
        }

        metrics.max_phi_residual = fitted
            .iter()
            .map(|t| (t.parameters.phi() - t.simulated.truth.phi).abs())
            .fold(0.0, f64::max);

        info!(
            "✓ TelescopeFit complete: {} tracks, mean chi2/ndf {:.3}, max dphi {:.2e}",
            metrics.tracks_fitted, metrics.mean_chi2_per_ndf, metrics.max_phi_residual
        );

        self.check_chi2(metrics)?;
        if metrics.max_phi_residual > 0.01 {
            return Err(SimError::Assertion(format!(
                "phi residual {:.4} exceeds 0.01",
                metrics.max_phi_residual
            )));
        }
        Ok(())
    }

    /// RECO-002: SingleVertex - density seed of one vertex.
    ///
    /// **Assertion**: seed z within the configured tolerance of the truth.
    fn run_single_vertex(&self, metrics: &mut ScenarioMetrics) -> Result<(), SimError> {
        info!("RECO-002: SingleVertex");

        let detector = Detector::new(self.detector_config.clone());
        let mut oracle = Oracle::new(self.seed);
        let vertex_z = oracle.sample_vertex_z(self.config.vertex_z_range);
        let simulated =
            oracle.generate_vertex(&detector, 0, vertex_z, self.config.tracks_per_vertex)?;
        metrics.tracks_generated = simulated.len();

        let fitted = self.fit_all(&detector, &oracle, &simulated, metrics)?;
        self.check_chi2(metrics)?;

        let density = Density::default();
        let mut grid = Density::empty_grid();
        for track in &fitted {
            density.add_track(&to_perigee(&track.parameters)?, &mut grid)?;
        }
        let (z, width) = density.get_max_z_position_and_width(&grid)?;
        metrics.vertices_found = 1;
        metrics.seed_width = f64::from(width);
        metrics.max_z_residual = (f64::from(z) - vertex_z).abs();

        info!(
            "✓ SingleVertex complete: z_true {:.3}mm, z_seed {:.3}mm, width {:.3}mm",
            vertex_z, z, width
        );

        self.check_z_residual(metrics)
    }

    /// RECO-003: TwoVertices - iterative seeding.
    ///
    /// The first seed is found, the tracks closest to it are removed from
    /// the grid, then the second seed is found.
    ///
    /// **Assertion**: both seeds within the configured tolerance of a truth
    /// vertex.
    fn run_two_vertices(&self, metrics: &mut ScenarioMetrics) -> Result<(), SimError> {
        info!("RECO-003: TwoVertices");

        let detector = Detector::new(self.detector_config.clone());
        let mut oracle = Oracle::new(self.seed);
        let separation = self.config.vertex_separation;
        let first_z = oracle.sample_vertex_z(self.config.vertex_z_range);
        let truth_z = [first_z, first_z + separation];

        let n = self.config.tracks_per_vertex;
        let mut simulated = oracle.generate_vertex(&detector, 0, truth_z[0], n)?;
        simulated.extend(oracle.generate_vertex(&detector, 1, truth_z[1], (n / 2).max(1))?);
        metrics.tracks_generated = simulated.len();

        let fitted = self.fit_all(&detector, &oracle, &simulated, metrics)?;
        self.check_chi2(metrics)?;

        let density = Density::default();
        let mut grid = Density::empty_grid();
        let mut contributions: Vec<(f64, TrackGridContribution<15>)> = Vec::new();
        for track in &fitted {
            let perigee = to_perigee(&track.parameters)?;
            let contribution = density.add_track(&perigee, &mut grid)?;
            contributions.push((perigee.parameters()[BOUND_LOC1], contribution));
        }

        let (z_first, width) = density.get_max_z_position_and_width(&grid)?;
        metrics.seed_width = f64::from(width);
        debug!(z = z_first, width, "first seed");

        remove_near(&density, &mut grid, &contributions, f64::from(z_first), separation / 2.0);
        let z_second = density.get_max_z_position(&grid)?;
        debug!(z = z_second, "second seed");
        metrics.vertices_found = 2;

        let mut found = [f64::from(z_first), f64::from(z_second)];
        found.sort_by(f64::total_cmp);
        metrics.max_z_residual = found
            .iter()
            .zip(truth_z.iter())
            .map(|(f, t)| (f - t).abs())
            .fold(0.0, f64::max);

        info!(
            "✓ TwoVertices complete: truth [{:.3}, {:.3}]mm, seeds [{:.3}, {:.3}]mm",
            truth_z[0], truth_z[1], found[0], found[1]
        );

        self.check_z_residual(metrics)
    }

    /// RECO-004: Linearize - expansion of every track at the seed.
    ///
    /// **Assertion**: every track linearizes and no transverse impact
    /// parameter pull exceeds the configured limit.
    fn run_linearize(&self, metrics: &mut ScenarioMetrics) -> Result<(), SimError> {
        info!("RECO-004: Linearize");

        let detector = Detector::new(self.detector_config.clone());
        let mut oracle = Oracle::new(self.seed);
        let vertex_z = oracle.sample_vertex_z(self.config.vertex_z_range);
        let simulated =
            oracle.generate_vertex(&detector, 0, vertex_z, self.config.tracks_per_vertex)?;
        metrics.tracks_generated = simulated.len();

        let fitted = self.fit_all(&detector, &oracle, &simulated, metrics)?;

        let density = Density::default();
        let mut grid = Density::empty_grid();
        for track in &fitted {
            density.add_track(&to_perigee(&track.parameters)?, &mut grid)?;
        }
        let z_seed = f64::from(density.get_max_z_position(&grid)?);
        metrics.vertices_found = 1;
        metrics.max_z_residual = (z_seed - vertex_z).abs();

        let gctx = GeometryContext::default();
        let linearizer =
            NumericalTrackLinearizer::new(StraightLinePropagator::new(), LinearizerConfig::default());
        let lin_point = Vector4::new(0.0, 0.0, z_seed, 0.0);
        for track in &fitted {
            let linearized = linearizer.linearize_track(&track.parameters, &lin_point, &gctx)?;
            let sigma_d0 = linearized.covariance_at_pca[(BOUND_LOC0, BOUND_LOC0)].sqrt();
            let pull = linearized.parameters_at_pca[BOUND_LOC0].abs() / sigma_d0;
            metrics.max_impact_pull = metrics.max_impact_pull.max(pull);
            metrics.tracks_linearized += 1;
        }

        info!(
            "✓ Linearize complete: {} tracks at z {:.3}mm, max d0 pull {:.2}",
            metrics.tracks_linearized, z_seed, metrics.max_impact_pull
        );

        self.check_z_residual(metrics)?;
        if !(metrics.max_impact_pull < self.config.max_impact_pull) {
            return Err(SimError::Assertion(format!(
                "d0 pull {:.2} exceeds threshold {:.1}",
                metrics.max_impact_pull, self.config.max_impact_pull
            )));
        }
        Ok(())
    }

    /// Fits every simulated track. Failed fits are counted, not propagated.
    fn fit_all<'a>(
        &self,
        detector: &Detector,
        oracle: &Oracle,
        simulated: &'a [SimulatedTrack],
        metrics: &mut ScenarioMetrics,
    ) -> Result<Vec<FittedTrack<'a>>, SimError> {
        let fitter = Gx2Fitter::new(StraightLinePropagator::new());
        let calibrator = PassThroughCalibrator::new(oracle.measurements());
        let extensions = Gx2FitterExtensions::with_calibrator(&calibrator);
        let options = Gx2FitterOptions {
            n_update_max: self.config.n_iterations,
            ..Gx2FitterOptions::default()
        };

        let mut tracks = TrackContainer::new();
        let mut fitted = Vec::with_capacity(simulated.len());
        let mut chi2_per_ndf_sum = 0.0;
        for sim in simulated {
            match fitter.fit(
                sim.source_links.iter().copied(),
                &sim.start,
                &options,
                &extensions,
                detector.planes(),
                &mut tracks,
            ) {
                Ok(index) => {
                    let track = &tracks.tracks()[index];
                    debug!(
                        particle = sim.truth.id,
                        chi2 = track.chi2,
                        ndf = track.ndf,
                        "fitted"
                    );
                    chi2_per_ndf_sum += track.chi2_per_ndf();
                    fitted.push(FittedTrack {
                        simulated: sim,
                        parameters: track.parameters.clone(),
                    });
                }
                Err(e) => {
                    warn!(particle = sim.truth.id, error = %e, "fit failed");
                    metrics.fit_failures += 1;
                }
            }
        }

        metrics.tracks_fitted = fitted.len();
        if fitted.is_empty() {
            return Err(SimError::Assertion("no track could be fitted".into()));
        }
        metrics.mean_chi2_per_ndf = chi2_per_ndf_sum / fitted.len() as f64;
        Ok(fitted)
    }

    fn check_chi2(&self, metrics: &ScenarioMetrics) -> Result<(), SimError> {
        if !(metrics.mean_chi2_per_ndf < self.config.max_chi2_per_ndf) {
            return Err(SimError::Assertion(format!(
                "mean chi2/ndf {:.2} exceeds threshold {:.1}",
                metrics.mean_chi2_per_ndf, self.config.max_chi2_per_ndf
            )));
        }
        Ok(())
    }

    fn check_z_residual(&self, metrics: &ScenarioMetrics) -> Result<(), SimError> {
        if !(metrics.max_z_residual < self.config.z_tolerance) {
            return Err(SimError::Assertion(format!(
                "vertex z residual {:.3}mm exceeds threshold {:.3}mm",
                metrics.max_z_residual, self.config.z_tolerance
            )));
        }
        Ok(())
    }
}

/// Expresses `params` at the perigee of the global z axis.
fn to_perigee(params: &BoundTrackParameters) -> Result<BoundTrackParameters, SimError> {
    let gctx = GeometryContext::default();
    let perigee: Arc<dyn Surface> = Arc::new(PerigeeSurface::new(Vector3::zeros()));
    let path_length = perigee.intersect(&gctx, &params.position(&gctx), &params.direction())?;
    let options = PropagatorOptions::default()
        .with_direction(Direction::from_scalar_zero_as_positive(path_length));
    let output = StraightLinePropagator::new().propagate(&gctx, params, &perigee, &options)?;
    Ok(output.end_parameters)
}

/// Removes every contribution whose track z0 lies within `radius` of `z`.
fn remove_near(
    density: &Density,
    grid: &mut MainGridVector<2000>,
    contributions: &[(f64, TrackGridContribution<15>)],
    z: f64,
    radius: f64,
) {
    for (z0, contribution) in contributions {
        if (z0 - z).abs() < radius {
            density.remove_track_grid_from_main_grid(contribution, grid);
        }
    }
}
