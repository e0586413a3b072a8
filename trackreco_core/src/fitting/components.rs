//! Pluggable per-state strategies used by the fitter.
//!
//! Every strategy is a trait with a named default. The calibrator has no
//! sensible default: [`VoidCalibrator`] only marks a missing configuration
//! and aborts when invoked.

use crate::error::{RecoError, Result};
use crate::event_data::{Measurement, SourceLink, TrackState, VectorTrajectory};
use trackreco_env::{CalibrationContext, Direction, GeometryContext};

// ============================================================================
// CONTRACTS
// ============================================================================

/// Turns an uncalibrated source link into the calibrated measurement of a
/// track state.
pub trait Calibrator {
    fn calibrate(
        &self,
        gctx: &GeometryContext,
        cctx: &CalibrationContext,
        source_link: &SourceLink,
        state: &mut TrackState,
    ) -> Result<()>;
}

/// Computes the filtered parameters of a track state.
pub trait Updater {
    fn update(&self, gctx: &GeometryContext, state: &mut TrackState, direction: Direction) -> Result<()>;
}

/// Decides whether a calibrated state is excluded from the fit.
pub trait OutlierFinder {
    fn is_outlier(&self, state: &TrackState) -> bool;
}

/// Computes smoothed parameters for a trajectory ending at `tip`.
pub trait Smoother {
    fn smooth(&self, gctx: &GeometryContext, trajectory: &mut VectorTrajectory, tip: usize) -> Result<()>;
}

// ============================================================================
// DEFAULTS
// ============================================================================

/// Placeholder calibrator. Must be replaced before fitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidCalibrator;

impl Calibrator for VoidCalibrator {
    fn calibrate(
        &self,
        _gctx: &GeometryContext,
        _cctx: &CalibrationContext,
        _source_link: &SourceLink,
        _state: &mut TrackState,
    ) -> Result<()> {
        panic!("VoidCalibrator should never execute: configure a calibrator");
    }
}

/// Filtered = predicted.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidUpdater;

impl Updater for VoidUpdater {
    fn update(&self, _gctx: &GeometryContext, state: &mut TrackState, _direction: Direction) -> Result<()> {
        state.filtered = state.predicted;
        state.filtered_covariance = state.predicted_covariance;
        Ok(())
    }
}

/// Flags nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidOutlierFinder;

impl OutlierFinder for VoidOutlierFinder {
    fn is_outlier(&self, _state: &TrackState) -> bool {
        false
    }
}

/// Smoothed = filtered, for every state from the tip backwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidSmoother;

impl Smoother for VoidSmoother {
    fn smooth(&self, _gctx: &GeometryContext, trajectory: &mut VectorTrajectory, tip: usize) -> Result<()> {
        trajectory.apply_backwards(tip, |state| {
            state.smoothed = state.filtered;
            state.smoothed_covariance = state.filtered_covariance;
        });
        Ok(())
    }
}

// ============================================================================
// CONCRETE STRATEGIES
// ============================================================================

/// Copies stored measurements into the state unchanged.
///
/// Source links index into the slice the calibrator was built with.
#[derive(Debug, Clone, Copy)]
pub struct PassThroughCalibrator<'a> {
    measurements: &'a [Measurement],
}

impl<'a> PassThroughCalibrator<'a> {
    pub fn new(measurements: &'a [Measurement]) -> Self {
        Self { measurements }
    }
}

impl Calibrator for PassThroughCalibrator<'_> {
    fn calibrate(
        &self,
        _gctx: &GeometryContext,
        _cctx: &CalibrationContext,
        source_link: &SourceLink,
        state: &mut TrackState,
    ) -> Result<()> {
        let measurement = self.measurements.get(source_link.index).ok_or_else(|| {
            RecoError::config(format!("source link index {} has no measurement", source_link.index))
        })?;
        if measurement.geometry_id != source_link.geometry_id {
            return Err(RecoError::config(format!(
                "source link on {} points to a measurement on {}",
                source_link.geometry_id, measurement.geometry_id
            )));
        }
        state.calibrated = Some(measurement.local);
        state.calibrated_covariance = Some(measurement.covariance);
        Ok(())
    }
}

/// Flags states whose chi2 exceeds a fixed cut.
#[derive(Debug, Clone, Copy)]
pub struct Chi2OutlierFinder {
    pub max_chi2: f64,
}

impl OutlierFinder for Chi2OutlierFinder {
    fn is_outlier(&self, state: &TrackState) -> bool {
        state.chi2 > self.max_chi2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_data::{MeasurementCovariance, MeasurementVector, TrackStatePropMask};
    use trackreco_env::{BoundSquareMatrix, BoundVector, GeometryIdentifier};

    fn predicted_state(traj: &mut VectorTrajectory, parent: Option<usize>) -> usize {
        let idx = traj.add_track_state(TrackStatePropMask::ALL, parent);
        traj[idx].predicted = Some(BoundVector::from([1.0, 2.0, 0.1, 1.5, 0.5, 0.0]));
        traj[idx].predicted_covariance = Some(BoundSquareMatrix::identity() * 2.0);
        idx
    }

    #[test]
    fn test_void_updater_passes_predicted_through() {
        let mut traj = VectorTrajectory::new();
        let idx = predicted_state(&mut traj, None);

        VoidUpdater
            .update(&GeometryContext::default(), &mut traj[idx], Direction::Forward)
            .unwrap();

        assert_eq!(traj[idx].filtered, traj[idx].predicted);
        assert_eq!(traj[idx].filtered_covariance, traj[idx].predicted_covariance);
    }

    #[test]
    fn test_void_smoother_walks_back_from_tip() {
        let gctx = GeometryContext::default();
        let mut traj = VectorTrajectory::new();
        let a = predicted_state(&mut traj, None);
        let b = predicted_state(&mut traj, Some(a));
        for idx in [a, b] {
            VoidUpdater.update(&gctx, &mut traj[idx], Direction::Forward).unwrap();
        }

        VoidSmoother.smooth(&gctx, &mut traj, b).unwrap();

        for idx in [a, b] {
            assert_eq!(traj[idx].smoothed, traj[idx].filtered);
            assert_eq!(traj[idx].smoothed_covariance, traj[idx].filtered_covariance);
        }
    }

    #[test]
    fn test_void_outlier_finder_flags_nothing() {
        let mut traj = VectorTrajectory::new();
        let idx = predicted_state(&mut traj, None);
        traj[idx].chi2 = 1e9;
        assert!(!VoidOutlierFinder.is_outlier(&traj[idx]));
        assert!(Chi2OutlierFinder { max_chi2: 10.0 }.is_outlier(&traj[idx]));
    }

    #[test]
    #[should_panic(expected = "VoidCalibrator")]
    fn test_void_calibrator_aborts() {
        let mut traj = VectorTrajectory::new();
        let idx = predicted_state(&mut traj, None);
        let link = SourceLink::new(GeometryIdentifier(1), 0);
        let _ = VoidCalibrator.calibrate(
            &GeometryContext::default(),
            &CalibrationContext::default(),
            &link,
            &mut traj[idx],
        );
    }

    #[test]
    fn test_pass_through_calibrator() {
        let measurements = vec![Measurement::new(
            GeometryIdentifier(4),
            MeasurementVector::new(0.5, -0.25),
            MeasurementCovariance::identity() * 0.01,
        )];
        let calibrator = PassThroughCalibrator::new(&measurements);
        let gctx = GeometryContext::default();
        let cctx = CalibrationContext::default();
        let mut traj = VectorTrajectory::new();
        let idx = predicted_state(&mut traj, None);

        calibrator
            .calibrate(&gctx, &cctx, &SourceLink::new(GeometryIdentifier(4), 0), &mut traj[idx])
            .unwrap();
        assert_eq!(traj[idx].calibrated, Some(MeasurementVector::new(0.5, -0.25)));

        let missing = calibrator.calibrate(&gctx, &cctx, &SourceLink::new(GeometryIdentifier(4), 3), &mut traj[idx]);
        assert!(matches!(missing, Err(RecoError::Configuration(_))));

        let wrong_surface =
            calibrator.calibrate(&gctx, &cctx, &SourceLink::new(GeometryIdentifier(5), 0), &mut traj[idx]);
        assert!(matches!(wrong_surface, Err(RecoError::Configuration(_))));
    }
}
