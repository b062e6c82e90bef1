use ndarray::{Array2, ArrayView2};
use scope_common::{CHANNELS_PER_SCOPE, Channel, Real};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CaptureError {
    #[error("Active-channel mask enables {active} channels but the waveform holds {recorded}")]
    ChannelCountMismatch { active: usize, recorded: usize },
    #[error("Capture declares zero samples per event")]
    ZeroSampleCount,
    #[error("Waveform rows of {row_length} samples are not a whole number of {samples}-sample events")]
    SampleCountMismatch { row_length: usize, samples: usize },
    #[error("Sample interval {0} is not a positive finite time")]
    InvalidSampleInterval(Real),
    #[error("Calibration of channel {channel} is not finite (scale {scale}, offset {offset})")]
    InvalidCalibration {
        channel: Channel,
        scale: Real,
        offset: Real,
    },
}

/// Converts digitiser codes to volts: `(code - offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub scale: Real,
    pub offset: Real,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl Calibration {
    pub fn to_volts(&self, code: Real) -> Real {
        (code - self.offset) * self.scale
    }

    fn is_finite(&self) -> bool {
        self.scale.is_finite() && self.offset.is_finite()
    }
}

/// Attributes stored with a capture which are not needed for processing,
/// but are carried through to the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(Real),
    Numbers(Vec<Real>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    pub calibration: [Calibration; CHANNELS_PER_SCOPE],
    pub samples_per_event: usize,
    pub active_channels: [bool; CHANNELS_PER_SCOPE],
    pub sample_interval: Real,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Calibrated voltages of every active channel, each indexed by (event, sample).
#[derive(Debug, Clone)]
pub struct Capture {
    channels: BTreeMap<Channel, Array2<Real>>,
    num_events: usize,
    samples_per_event: usize,
    sample_interval: Real,
    attributes: BTreeMap<String, AttributeValue>,
}

impl Capture {
    /// Builds a capture from the waveform block as stored by the scope.
    ///
    /// # Parameters
    /// - recorded: one row per active channel (in channel order), each row holding
    ///   every event's samples back to back.
    /// - metadata: calibration and layout attributes stored alongside the block.
    ///
    /// # Error Modes
    /// Returns [CaptureError] if the block's layout disagrees with the metadata.
    /// Rows are never truncated or wrapped to make them fit.
    pub fn from_recorded(
        recorded: ArrayView2<Real>,
        metadata: CaptureMetadata,
    ) -> Result<Self, CaptureError> {
        let active = metadata.active_channels.iter().filter(|&&a| a).count();
        if active != recorded.nrows() {
            return Err(CaptureError::ChannelCountMismatch {
                active,
                recorded: recorded.nrows(),
            });
        }
        let samples = metadata.samples_per_event;
        if samples == 0 {
            return Err(CaptureError::ZeroSampleCount);
        }
        let row_length = recorded.ncols();
        if row_length % samples != 0 {
            return Err(CaptureError::SampleCountMismatch {
                row_length,
                samples,
            });
        }
        if !(metadata.sample_interval.is_finite() && metadata.sample_interval > 0.0) {
            return Err(CaptureError::InvalidSampleInterval(
                metadata.sample_interval,
            ));
        }
        let num_events = row_length / samples;

        let active_channels = metadata
            .active_channels
            .iter()
            .enumerate()
            .filter_map(|(channel, &active)| active.then_some(channel));

        let mut channels = BTreeMap::new();
        for (channel, row) in active_channels.zip(recorded.rows()) {
            let calibration = metadata.calibration[channel];
            if !calibration.is_finite() {
                return Err(CaptureError::InvalidCalibration {
                    channel,
                    scale: calibration.scale,
                    offset: calibration.offset,
                });
            }
            let volts = row.iter().map(|&code| calibration.to_volts(code)).collect();
            let block = Array2::from_shape_vec((num_events, samples), volts).map_err(|_| {
                CaptureError::SampleCountMismatch {
                    row_length,
                    samples,
                }
            })?;
            channels.insert(channel, block);
        }

        Ok(Self {
            channels,
            num_events,
            samples_per_event: samples,
            sample_interval: metadata.sample_interval,
            attributes: metadata.attributes,
        })
    }

    /// Voltages of the given channel, or None if it was not recorded.
    pub fn channel(&self, channel: Channel) -> Option<ArrayView2<'_, Real>> {
        self.channels.get(&channel).map(Array2::view)
    }

    pub fn is_active(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn active_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn samples_per_event(&self) -> usize {
        self.samples_per_event
    }

    pub fn sample_interval(&self) -> Real {
        self.sample_interval
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }
}
