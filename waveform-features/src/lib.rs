//! This crate turns oscilloscope captures into per-event physics quantities.
//!
//! A capture holds, for each active channel, a block of calibrated voltages
//! indexed by (event, sample). Typical usage looks like:
//! ```ignore
//! let capture = Capture::from_recorded(recorded.view(), metadata)?;
//! let features = process_capture(&capture, &ScopeConfig::default())?;
//! for (channel, difference) in features.crossing_times.differences() {
//!     // histogram `difference`
//! }
//! ```
//! The individual stages are also exposed:
//! - [normalize()] subtracts the per-event pedestal and divides out the post-gain,
//! - [features::amplitude], [features::charge] and [features::crossing_times]
//!   reduce each event to a scalar,
//! - [selection::coincidence_mask] gates events on several channels at once.

pub mod budget;
pub mod capture;
pub mod config;
pub mod features;
pub mod normalize;
pub mod numerics;
pub mod pipeline;
pub mod selection;
pub mod statistics;

pub use budget::{Deadline, TimingBudget};
pub use capture::{AttributeValue, Calibration, Capture, CaptureError, CaptureMetadata};
pub use config::{ConfigError, GainMode, RootFailurePolicy, ScopeConfig, ScopeSettings};
pub use normalize::normalize;
pub use pipeline::{CaptureFeatures, ChannelFeatures, CrossingTimes, PipelineError, process_capture};

pub use scope_common::{Channel, Real};
