//! Fitted tracks and the container owning them.

use crate::event_data::measurement::MEAS_DIM;
use crate::event_data::trajectory::VectorTrajectory;
use trackreco_env::BoundTrackParameters;

/// Summary of a fitted track.
#[derive(Debug, Clone)]
pub struct Track {
    /// Fitted parameters and covariance on the reference surface
    pub parameters: BoundTrackParameters,

    /// Last state of the track's trajectory, if any
    pub tip_index: Option<usize>,

    pub n_measurements: usize,
    pub n_holes: usize,
    pub n_outliers: usize,
    pub chi2: f64,
    /// Sum of the dimensions of all measurements used in the fit
    pub ndf: usize,

    /// Number of Gauss-Newton iterations performed
    pub n_iterations: usize,
    /// The reduced normal equations were rank deficient in some iteration
    pub rank_deficient: bool,
}

impl Track {
    /// A track without any trajectory information yet.
    pub fn new(parameters: BoundTrackParameters, tip_index: Option<usize>) -> Self {
        Self {
            parameters,
            tip_index,
            n_measurements: 0,
            n_holes: 0,
            n_outliers: 0,
            chi2: 0.0,
            ndf: 0,
            n_iterations: 0,
            rank_deficient: false,
        }
    }

    /// Derives counts, chi2 and ndf from the track's trajectory.
    pub fn calculate_track_quantities(&mut self, trajectory: &VectorTrajectory) {
        self.n_measurements = 0;
        self.n_holes = 0;
        self.n_outliers = 0;
        self.chi2 = 0.0;
        self.ndf = 0;

        let Some(tip) = self.tip_index else {
            return;
        };
        for (_, state) in trajectory.iter_backwards(tip) {
            let flags = state.type_flags;
            if flags.measurement {
                self.n_measurements += 1;
                self.chi2 += state.chi2;
                self.ndf += MEAS_DIM;
            } else if flags.outlier {
                self.n_outliers += 1;
            } else if flags.hole {
                self.n_holes += 1;
            }
        }
    }

    /// chi2 per degree of freedom (0 without measurements).
    pub fn chi2_per_ndf(&self) -> f64 {
        if self.ndf == 0 {
            0.0
        } else {
            self.chi2 / self.ndf as f64
        }
    }
}

/// Append-only list of tracks together with the trajectory arena their
/// states live in.
#[derive(Debug, Clone, Default)]
pub struct TrackContainer {
    tracks: Vec<Track>,
    trajectory: VectorTrajectory,
}

impl TrackContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track and returns its index.
    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn trajectory(&self) -> &VectorTrajectory {
        &self.trajectory
    }

    pub fn trajectory_mut(&mut self) -> &mut VectorTrajectory {
        &mut self.trajectory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_data::trajectory::TrackStatePropMask;
    use nalgebra::Vector3;
    use trackreco_env::Vector4;

    #[test]
    fn test_track_quantities_from_trajectory() {
        let mut container = TrackContainer::new();
        let traj = container.trajectory_mut();

        let m1 = traj.add_track_state(TrackStatePropMask::ALL, None);
        traj[m1].type_flags.measurement = true;
        traj[m1].chi2 = 1.5;
        let hole = traj.add_track_state(TrackStatePropMask::PREDICTED, Some(m1));
        traj[hole].type_flags.hole = true;
        let out = traj.add_track_state(TrackStatePropMask::ALL, Some(hole));
        traj[out].type_flags.outlier = true;
        traj[out].chi2 = 100.0;
        let m2 = traj.add_track_state(TrackStatePropMask::ALL, Some(out));
        traj[m2].type_flags.measurement = true;
        traj[m2].chi2 = 0.5;

        let params = BoundTrackParameters::curvilinear(Vector4::zeros(), Vector3::x(), 1.0, None);
        let mut track = Track::new(params, Some(m2));
        track.calculate_track_quantities(container.trajectory());

        assert_eq!(track.n_measurements, 2);
        assert_eq!(track.n_holes, 1);
        assert_eq!(track.n_outliers, 1);
        assert_eq!(track.chi2, 2.0);
        assert_eq!(track.ndf, 4);
        assert_eq!(track.chi2_per_ndf(), 0.5);

        let index = container.add_track(track);
        assert_eq!(index, 0);
        assert_eq!(container.len(), 1);
        assert_eq!(container.get(0).map(|t| t.tip_index), Some(Some(m2)));
    }

    #[test]
    fn test_track_without_tip_has_no_quantities() {
        let params = BoundTrackParameters::curvilinear(Vector4::zeros(), Vector3::x(), 1.0, None);
        let mut track = Track::new(params, None);
        track.calculate_track_quantities(&VectorTrajectory::new());
        assert_eq!(track.ndf, 0);
        assert_eq!(track.chi2_per_ndf(), 0.0);
    }
}
