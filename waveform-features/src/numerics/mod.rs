//! Interpolation and root finding on uniformly sampled waveforms.

mod root;
mod spline;

pub use root::{NewtonSolver, RootFindError};
pub use spline::{CubicSpline, SplineError};
