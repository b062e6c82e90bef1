//! Histograms and summary statistics of per-event features.

mod gaussian;
mod histogram;

pub use gaussian::{FitError, GaussianFit, fit_gaussian};
pub use histogram::{Histogram, Summary};
