//! Per-event reductions of normalized waveforms.
//! Each takes a block indexed by (event, sample) and returns one value per event.

mod amplitude;
mod charge;
mod crossing;

pub use amplitude::amplitude;
pub use charge::{charge, simpson};
pub use crossing::{Crossing, CrossingError, CrossingOptions, crossing_time, crossing_times};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("Events have no samples")]
    EmptyWaveform,
    #[error("Transconductance {0} is not a positive finite number")]
    Transconductance(scope_common::Real),
}
