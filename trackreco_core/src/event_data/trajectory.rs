//! Append-only arena of track states.
//!
//! States are never removed or reordered. Each state stores the index of
//! its predecessor, so one arena can hold many trajectories (including the
//! discarded ones of earlier fit iterations); a trajectory is identified by
//! the index of its last state, the tip.

use crate::event_data::measurement::{MeasurementCovariance, MeasurementVector, SourceLink};
use std::ops::{BitOr, Index, IndexMut};
use std::sync::Arc;
use trackreco_env::{BoundMatrix, BoundSquareMatrix, BoundVector, Surface};

// ============================================================================
// PROPERTY MASK
// ============================================================================

/// Which optional components of a [`TrackState`] are allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TrackStatePropMask(u8);

impl TrackStatePropMask {
    pub const NONE: Self = Self(0);
    pub const PREDICTED: Self = Self(1);
    pub const FILTERED: Self = Self(1 << 1);
    pub const SMOOTHED: Self = Self(1 << 2);
    pub const JACOBIAN: Self = Self(1 << 3);
    pub const CALIBRATED: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    /// Whether every component of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TrackStatePropMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Role of a state within its trajectory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStateType {
    pub measurement: bool,
    pub outlier: bool,
    pub hole: bool,
}

// ============================================================================
// TRACK STATE
// ============================================================================

/// One surface crossing of a trajectory.
///
/// Components not requested by the allocation mask stay `None`.
#[derive(Debug, Clone)]
pub struct TrackState {
    parent: Option<usize>,
    mask: TrackStatePropMask,

    pub reference_surface: Option<Arc<dyn Surface>>,
    pub source_link: Option<SourceLink>,

    pub predicted: Option<BoundVector>,
    pub predicted_covariance: Option<BoundSquareMatrix>,
    pub filtered: Option<BoundVector>,
    pub filtered_covariance: Option<BoundSquareMatrix>,
    pub smoothed: Option<BoundVector>,
    pub smoothed_covariance: Option<BoundSquareMatrix>,

    /// Transport Jacobian from the previous surface
    pub jacobian: Option<BoundMatrix>,
    pub path_length: f64,

    pub calibrated: Option<MeasurementVector>,
    pub calibrated_covariance: Option<MeasurementCovariance>,

    pub chi2: f64,
    pub type_flags: TrackStateType,
}

impl TrackState {
    fn allocate(mask: TrackStatePropMask, parent: Option<usize>) -> Self {
        let bound = |component| mask.contains(component).then(BoundVector::zeros);
        let square = |component| mask.contains(component).then(BoundSquareMatrix::zeros);
        Self {
            parent,
            mask,
            reference_surface: None,
            source_link: None,
            predicted: bound(TrackStatePropMask::PREDICTED),
            predicted_covariance: square(TrackStatePropMask::PREDICTED),
            filtered: bound(TrackStatePropMask::FILTERED),
            filtered_covariance: square(TrackStatePropMask::FILTERED),
            smoothed: bound(TrackStatePropMask::SMOOTHED),
            smoothed_covariance: square(TrackStatePropMask::SMOOTHED),
            jacobian: mask.contains(TrackStatePropMask::JACOBIAN).then(BoundMatrix::identity),
            path_length: 0.0,
            calibrated: mask
                .contains(TrackStatePropMask::CALIBRATED)
                .then(MeasurementVector::zeros),
            calibrated_covariance: mask
                .contains(TrackStatePropMask::CALIBRATED)
                .then(MeasurementCovariance::zeros),
            chi2: 0.0,
            type_flags: TrackStateType::default(),
        }
    }

    /// Index of the previous state of the trajectory.
    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Components allocated for this state.
    #[inline]
    pub fn mask(&self) -> TrackStatePropMask {
        self.mask
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// Growable, append-only store of [`TrackState`]s.
#[derive(Debug, Clone, Default)]
pub struct VectorTrajectory {
    states: Vec<TrackState>,
}

impl VectorTrajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a state and returns its index.
    pub fn add_track_state(&mut self, mask: TrackStatePropMask, parent: Option<usize>) -> usize {
        self.states.push(TrackState::allocate(mask, parent));
        self.states.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&TrackState> {
        self.states.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TrackState> {
        self.states.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Walks from `tip` to the first state of its trajectory.
    pub fn iter_backwards(&self, tip: usize) -> BackwardsIter<'_> {
        BackwardsIter {
            trajectory: self,
            next: Some(tip),
        }
    }

    /// Applies `f` to every state from `tip` back to the start of its
    /// trajectory.
    pub fn apply_backwards<F>(&mut self, tip: usize, mut f: F)
    where
        F: FnMut(&mut TrackState),
    {
        let mut next = Some(tip);
        while let Some(index) = next {
            let Some(state) = self.states.get_mut(index) else {
                break;
            };
            f(state);
            next = state.parent;
        }
    }
}

impl Index<usize> for VectorTrajectory {
    type Output = TrackState;

    fn index(&self, index: usize) -> &TrackState {
        &self.states[index]
    }
}

impl IndexMut<usize> for VectorTrajectory {
    fn index_mut(&mut self, index: usize) -> &mut TrackState {
        &mut self.states[index]
    }
}

/// Iterator over `(index, state)` following parent links.
pub struct BackwardsIter<'a> {
    trajectory: &'a VectorTrajectory,
    next: Option<usize>,
}

impl<'a> Iterator for BackwardsIter<'a> {
    type Item = (usize, &'a TrackState);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        let state = self.trajectory.get(index)?;
        self.next = state.parent;
        Some((index, state))
    }
}
