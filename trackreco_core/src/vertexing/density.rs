//! Gaussian track density on a 1D grid along the beam axis.
//!
//! Each track's transverse impact parameter uncertainty is modelled as a 2D
//! Gaussian in (d0, z0). Only the slice of that Gaussian crossing the z axis
//! is kept, rasterised into a small odd-sized track grid and superimposed on
//! the main grid. The main grid's mode is the vertex seed, and its FWHM the
//! seed width.

use crate::error::{RecoError, Result};
use nalgebra::{Matrix2, SVector};
use serde::{Deserialize, Serialize};
use trackreco_env::{BoundTrackParameters, BOUND_LOC0, BOUND_LOC1};

/// Main density grid along z.
pub type MainGridVector<const MAIN: usize> = SVector<f32, MAIN>;

/// Density contribution of a single track.
pub type TrackGridVector<const TRK: usize> = SVector<f32, TRK>;

/// 2√(2 ln 2), the ratio between FWHM and sigma of a Gaussian.
const FWHM_PER_SIGMA: f32 = 2.354_820_1;

/// Bins at or below this magnitude count as empty.
const EMPTY_GRID_TOLERANCE: f32 = 1e-5;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the [`GaussianGridTrackDensity`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDensityConfig {
    /// Half range of the main grid in mm; the grid covers [-z_min_max, z_min_max]
    /// (default: 100 mm)
    pub z_min_max: f32,

    /// Pick the local maximum with the highest 3-bin density sum instead of
    /// the global maximum (default: false)
    pub use_highest_sum_z_position: bool,

    /// Maximum relative deviation from the global maximum for a local maximum
    /// to be considered by the highest-sum policy (default: 0.01)
    pub max_relative_density_dev: f32,
}

impl Default for GridDensityConfig {
    fn default() -> Self {
        Self {
            z_min_max: 100.0,
            use_highest_sum_z_position: false,
            max_relative_density_dev: 0.01,
        }
    }
}

// ============================================================================
// TRACK CONTRIBUTION
// ============================================================================

/// What a single `add_track` call put into the main grid.
///
/// Pass it back unchanged to
/// [`GaussianGridTrackDensity::remove_track_grid_from_main_grid`] to undo the
/// addition.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGridContribution<const TRK: usize> {
    /// Main grid bin the track grid is centered on; `None` if the track did
    /// not contribute
    pub z_bin: Option<usize>,

    /// The rasterised density of the track
    pub track_grid: TrackGridVector<TRK>,
}

impl<const TRK: usize> TrackGridContribution<TRK> {
    fn none() -> Self {
        Self {
            z_bin: None,
            track_grid: TrackGridVector::zeros(),
        }
    }

    /// Whether the track changed the main grid at all.
    pub fn contributed(&self) -> bool {
        self.z_bin.is_some()
    }
}

// ============================================================================
// DENSITY
// ============================================================================

/// Grid-based track density for vertex seeding.
///
/// `MAIN` is the number of main grid bins, `TRK` the (odd) number of bins of
/// a single track's contribution.
#[derive(Debug, Clone)]
pub struct GaussianGridTrackDensity<const MAIN: usize = 2000, const TRK: usize = 15> {
    config: GridDensityConfig,
}

impl<const MAIN: usize, const TRK: usize> GaussianGridTrackDensity<MAIN, TRK> {
    const GRID_SIZES_VALID: () = assert!(
        TRK % 2 == 1 && MAIN > TRK,
        "track grid size must be odd and smaller than the main grid"
    );

    pub fn new(config: GridDensityConfig) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::GRID_SIZES_VALID;
        Self { config }
    }

    pub fn config(&self) -> &GridDensityConfig {
        &self.config
    }

    /// Width of one main grid bin in mm.
    #[inline]
    pub fn bin_size(&self) -> f32 {
        2.0 * self.config.z_min_max / MAIN as f32
    }

    /// An all-zero main grid.
    pub fn empty_grid() -> MainGridVector<MAIN> {
        MainGridVector::zeros()
    }

    /// z of the center of main grid bin `bin`.
    #[inline]
    pub fn z_bin_center(&self, bin: usize) -> f32 {
        (bin as f32 + 0.5) * self.bin_size() - self.config.z_min_max
    }

    /// Main grid bin containing `z`, if inside the grid.
    pub fn z_to_bin(&self, z: f32) -> Option<usize> {
        let bin = (z / self.bin_size() + MAIN as f32 / 2.0).floor();
        if bin >= 0.0 && bin < MAIN as f32 {
            Some(bin as usize)
        } else {
            None
        }
    }

    // ========== Add / Remove ==========

    /// Adds a track's density to `main_grid`.
    ///
    /// The track must be expressed at a perigee surface on the beam axis and
    /// carry a covariance. Tracks whose d0 is too large for any of their
    /// density to reach the z axis, or whose z0 lies outside the grid, are
    /// skipped and yield a contribution with `z_bin == None`.
    ///
    /// # Errors
    ///
    /// - [`RecoError::MissingCovariance`] if the track has no covariance
    /// - [`RecoError::SingularSystem`] if the (d0, z0) covariance block is
    ///   not positive definite
    pub fn add_track(
        &self,
        track: &BoundTrackParameters,
        main_grid: &mut MainGridVector<MAIN>,
    ) -> Result<TrackGridContribution<TRK>> {
        let cov = track
            .spatial_impact_parameter_covariance()
            .ok_or(RecoError::MissingCovariance)?
            .map(|x| x as f32);
        let det = cov.determinant();
        if !(det.is_finite() && det > 0.0) {
            return Err(RecoError::singular(format!(
                "impact parameter covariance has determinant {det}"
            )));
        }
        let d0 = track.parameters()[BOUND_LOC0] as f32;
        let z0 = track.parameters()[BOUND_LOC1] as f32;
        let bin_size = self.bin_size();
        let half_width = (TRK - 1) / 2;

        // Offset (in bins) of the track from the z axis in d direction
        let d_offset = (d0 / bin_size - 0.5).floor() as i64 + 1;
        if d_offset.unsigned_abs() as usize > half_width {
            return Ok(TrackGridContribution::none());
        }

        let Some(z_bin) = self.z_to_bin(z0) else {
            return Ok(TrackGridContribution::none());
        };

        let dist_ctr_d = d0 - d_offset as f32 * bin_size;
        let dist_ctr_z = z0 - self.z_bin_center(z_bin);

        let track_grid = self.create_track_grid(d_offset, &cov, dist_ctr_d, dist_ctr_z);
        self.modify_main_grid(z_bin, &track_grid, main_grid, 1.0);

        Ok(TrackGridContribution {
            z_bin: Some(z_bin),
            track_grid,
        })
    }

    /// Subtracts a contribution previously returned by [`Self::add_track`].
    ///
    /// Nothing checks that the contribution is actually present in the grid.
    pub fn remove_track_grid_from_main_grid(
        &self,
        contribution: &TrackGridContribution<TRK>,
        main_grid: &mut MainGridVector<MAIN>,
    ) {
        if let Some(z_bin) = contribution.z_bin {
            self.modify_main_grid(z_bin, &contribution.track_grid, main_grid, -1.0);
        }
    }

    /// Adds (`sign = 1`) or subtracts (`sign = -1`) a track grid centered on
    /// `z_bin`, dropping the part hanging over either end of the main grid.
    fn modify_main_grid(
        &self,
        z_bin: usize,
        track_grid: &TrackGridVector<TRK>,
        main_grid: &mut MainGridVector<MAIN>,
        sign: f32,
    ) {
        let half_width = (TRK - 1) / 2;
        for (j, value) in track_grid.iter().enumerate() {
            let Some(bin) = (z_bin + j).checked_sub(half_width) else {
                continue;
            };
            if bin < MAIN {
                main_grid[bin] += sign * value;
            }
        }
    }

    /// Evaluates the track's Gaussian along the TRK z bins around its z bin,
    /// at the d row selected by `d_offset`.
    fn create_track_grid(
        &self,
        d_offset: i64,
        cov: &Matrix2<f32>,
        dist_ctr_d: f32,
        dist_ctr_z: f32,
    ) -> TrackGridVector<TRK> {
        let bin_size = self.bin_size();
        let half_trk = TRK as f32 / 2.0;
        let row = ((TRK - 1) / 2) as f32 + d_offset as f32;
        let d = (row - half_trk + 0.5) * bin_size;

        TrackGridVector::from_fn(|j, _| {
            let z = (j as f32 - half_trk + 0.5) * bin_size;
            normal_2d(d + dist_ctr_d, z - dist_ctr_z, cov)
        })
    }

    // ========== Queries ==========

    /// z position of the maximum track density.
    pub fn get_max_z_position(&self, main_grid: &MainGridVector<MAIN>) -> Result<f32> {
        let bin = self.max_bin(main_grid)?;
        Ok(self.z_bin_center(bin))
    }

    /// z position of the maximum track density together with a Gaussian
    /// equivalent width estimated from the FWHM of the peak.
    pub fn get_max_z_position_and_width(
        &self,
        main_grid: &MainGridVector<MAIN>,
    ) -> Result<(f32, f32)> {
        let bin = self.max_bin(main_grid)?;
        let width = self.estimate_seed_width(main_grid, bin)?;
        Ok((self.z_bin_center(bin), width))
    }

    fn max_bin(&self, main_grid: &MainGridVector<MAIN>) -> Result<usize> {
        if let Some(bin) = main_grid.iter().position(|v| !v.is_finite()) {
            return Err(RecoError::NonFiniteDensity(bin));
        }
        if main_grid.iter().all(|v| v.abs() <= EMPTY_GRID_TOLERANCE) {
            return Err(RecoError::EmptyGrid);
        }
        if self.config.use_highest_sum_z_position {
            Ok(self.highest_sum_z_bin(main_grid))
        } else {
            Ok(first_max_bin(main_grid))
        }
    }

    /// Among the local maxima within `max_relative_density_dev` of the
    /// global maximum, the one with the highest 3-bin density sum.
    fn highest_sum_z_bin(&self, main_grid: &MainGridVector<MAIN>) -> usize {
        let global_bin = first_max_bin(main_grid);
        let threshold = (1.0 - self.config.max_relative_density_dev) * main_grid[global_bin];

        let mut best_bin = global_bin;
        let mut best_sum = f64::NEG_INFINITY;
        for bin in 0..MAIN {
            let value = main_grid[bin];
            if value < threshold || !is_local_max(main_grid, bin) {
                continue;
            }
            let sum = density_sum(main_grid, bin);
            if sum > best_sum {
                best_sum = sum;
                best_bin = bin;
            }
        }
        best_bin
    }

    /// Gaussian sigma equivalent of the FWHM around `peak_bin`.
    fn estimate_seed_width(&self, main_grid: &MainGridVector<MAIN>, peak_bin: usize) -> Result<f32> {
        if peak_bin == 0 || peak_bin == MAIN - 1 {
            return Err(RecoError::EdgeOfGrid(peak_bin));
        }
        let bin_size = self.bin_size();
        let half_max = main_grid[peak_bin] / 2.0;

        let right = (peak_bin + 1..MAIN)
            .find(|&bin| main_grid[bin] <= half_max)
            .ok_or(RecoError::NoHalfMaxCrossing("right"))?;
        let left = (0..peak_bin)
            .rev()
            .find(|&bin| main_grid[bin] <= half_max)
            .ok_or(RecoError::NoHalfMaxCrossing("left"))?;

        // Linear interpolation between the crossing bin and its inner neighbour
        let delta_right =
            (half_max - main_grid[right]) * bin_size / (main_grid[right - 1] - main_grid[right]);
        let delta_left =
            (half_max - main_grid[left]) * bin_size / (main_grid[left + 1] - main_grid[left]);

        let fwhm = (right - left) as f32 * bin_size - delta_right - delta_left;
        let width = fwhm / FWHM_PER_SIGMA;
        Ok(if width.is_normal() { width } else { 0.0 })
    }
}

impl<const MAIN: usize, const TRK: usize> Default for GaussianGridTrackDensity<MAIN, TRK> {
    fn default() -> Self {
        Self::new(GridDensityConfig::default())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Unnormalised 2D Gaussian density at (d, z).
fn normal_2d(d: f32, z: f32, cov: &Matrix2<f32>) -> f32 {
    let det = cov.determinant();
    let coef = 1.0 / det.sqrt();
    let expo = -1.0 / (2.0 * det)
        * (cov[(1, 1)] * d * d - (cov[(0, 1)] + cov[(1, 0)]) * d * z + cov[(0, 0)] * z * z);
    coef * expo.exp()
}

/// Index of the maximum; the first one on ties.
fn first_max_bin<const MAIN: usize>(main_grid: &MainGridVector<MAIN>) -> usize {
    let mut best = 0;
    for (bin, &value) in main_grid.iter().enumerate() {
        if value > main_grid[best] {
            best = bin;
        }
    }
    best
}

fn is_local_max<const MAIN: usize>(main_grid: &MainGridVector<MAIN>, bin: usize) -> bool {
    let value = main_grid[bin];
    let left_ok = bin == 0 || value >= main_grid[bin - 1];
    let right_ok = bin + 1 == MAIN || value >= main_grid[bin + 1];
    left_ok && right_ok
}

/// Density of `bin` plus its neighbours (one-sided at the edges).
fn density_sum<const MAIN: usize>(main_grid: &MainGridVector<MAIN>, bin: usize) -> f64 {
    let mut sum = main_grid[bin] as f64;
    if bin > 0 {
        sum += main_grid[bin - 1] as f64;
    }
    if bin + 1 < MAIN {
        sum += main_grid[bin + 1] as f64;
    }
    sum
}
