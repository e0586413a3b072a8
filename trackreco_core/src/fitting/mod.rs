//! Track fitting: the global chi-square fitter and its strategies.

pub mod components;
pub mod gx2f;

pub use components::{
    Calibrator, Chi2OutlierFinder, OutlierFinder, PassThroughCalibrator, Smoother, Updater,
    VoidCalibrator, VoidOutlierFinder, VoidSmoother, VoidUpdater,
};
pub use gx2f::{Gx2Fitter, Gx2FitterExtensions, Gx2FitterOptions, Gx2FitterResult};
