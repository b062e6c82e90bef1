pub mod metrics;
pub mod tracer;

/// Zero-based index of an oscilloscope input.
pub type Channel = usize;
pub type Real = f64;

/// The number of inputs on the scope, and the length of every per-channel
/// configuration array and of the capture's active-channel mask.
pub const CHANNELS_PER_SCOPE: usize = 4;

/// Recorded in place of a crossing time when none could be found.
pub const NO_CROSSING_TIME: Real = -1.0;

/// Crossing times at or below this value are treated as not found.
pub const CROSSING_TIME_CUTOFF: Real = -0.5;

pub fn is_valid_crossing_time(time: Real) -> bool {
    time > CROSSING_TIME_CUTOFF
}

/// Channels are numbered from one on the scope's front panel.
pub fn channel_label(channel: Channel) -> usize {
    channel + 1
}
