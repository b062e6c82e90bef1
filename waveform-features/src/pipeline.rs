use crate::{
    capture::Capture,
    config::{ConfigError, ScopeConfig},
    features::{self, CrossingError, CrossingOptions, FeatureError},
    normalize::normalize,
    selection,
};
use ndarray::{Array1, Array2};
use scope_common::{Channel, Real};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info_span, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Channel {channel}: {source}")]
    Feature {
        channel: Channel,
        #[source]
        source: FeatureError,
    },
    #[error("Channel {channel}: {source}")]
    Crossing {
        channel: Channel,
        #[source]
        source: CrossingError,
    },
}

impl PipelineError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PipelineError::Crossing {
                source: CrossingError::Timeout { .. },
                ..
            }
        )
    }

    pub fn is_root_find_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Crossing {
                source: CrossingError::RootFind { .. },
                ..
            }
        )
    }
}

/// Amplitude and charge of the events which passed the coincidence mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFeatures {
    pub amplitude: Array1<Real>,
    pub charge: Array1<Real>,
}

/// Crossing times of every event, split into the trigger channel and the
/// channels measured against it.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct CrossingTimes {
    trigger: Option<(Channel, Array1<Real>)>,
    measurements: BTreeMap<Channel, Array1<Real>>,
}

impl CrossingTimes {
    fn new(trigger_channel: Channel, mut times: BTreeMap<Channel, Array1<Real>>) -> Self {
        let trigger = times
            .remove(&trigger_channel)
            .map(|times| (trigger_channel, times));
        Self {
            trigger,
            measurements: times,
        }
    }

    pub fn trigger(&self) -> Option<(Channel, &Array1<Real>)> {
        self.trigger.as_ref().map(|(channel, times)| (*channel, times))
    }

    pub fn measurements(&self) -> &BTreeMap<Channel, Array1<Real>> {
        &self.measurements
    }

    /// Crossing times of all channels, trigger included.
    pub fn all(&self) -> impl Iterator<Item = (Channel, &Array1<Real>)> {
        self.trigger()
            .into_iter()
            .chain(self.measurements.iter().map(|(&channel, times)| (channel, times)))
    }

    /// `measurement - trigger` over the events where both were found, for each
    /// measurement channel. Empty without a trigger channel.
    pub fn differences(&self) -> BTreeMap<Channel, Array1<Real>> {
        let Some((_, trigger)) = &self.trigger else {
            return BTreeMap::new();
        };
        self.measurements
            .iter()
            .map(|(&channel, times)| {
                (channel, selection::time_differences(times.view(), trigger.view()))
            })
            .collect()
    }
}

/// Everything extracted from one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFeatures {
    pub num_events: usize,
    pub mask: Array1<bool>,
    pub channels: BTreeMap<Channel, ChannelFeatures>,
    pub crossing_times: CrossingTimes,
}

impl CaptureFeatures {
    pub fn num_selected(&self) -> usize {
        self.mask.iter().filter(|&&pass| pass).count()
    }
}

/// Extracts the features of every active channel of a capture.
///
/// Processing runs in three phases:
/// 1. each active channel is normalized,
/// 2. the coincidence channels' amplitudes build the event mask,
/// 3. amplitude and charge are taken over the masked events and crossing
///    times over all events.
///
/// Channels named by the configuration but absent from the capture are
/// skipped with a warning. Without any active coincidence channel every
/// event is selected.
#[tracing::instrument(skip_all, fields(events = capture.num_events(), selected))]
pub fn process_capture(
    capture: &Capture,
    config: &ScopeConfig,
) -> Result<CaptureFeatures, PipelineError> {
    config.check_samples_per_event(capture.samples_per_event())?;
    let file_deadline = config.root_finding.budget.file_deadline();

    let normalized = info_span!("normalize").in_scope(|| {
        capture
            .active_channels()
            .filter_map(|channel| {
                let waveforms = capture.channel(channel)?;
                Some(
                    normalize(waveforms, config.pedestal_window, config.post_gains[channel])
                        .map(|normalized| (channel, normalized)),
                )
            })
            .collect::<Result<BTreeMap<Channel, Array2<Real>>, _>>()
    })?;

    let mask = info_span!("select").in_scope(|| -> Result<_, PipelineError> {
        let mut gates = Vec::new();
        for coincidence in &config.coincidence {
            let Some(waveforms) = normalized.get(&coincidence.channel) else {
                warn!(
                    channel = coincidence.channel,
                    "Coincidence channel inactive, skipping"
                );
                continue;
            };
            let amplitude = features::amplitude(waveforms.view()).map_err(|source| {
                PipelineError::Feature {
                    channel: coincidence.channel,
                    source,
                }
            })?;
            gates.push((amplitude, coincidence.threshold));
        }
        if gates.is_empty() {
            warn!("No active coincidence channels, selecting every event");
            return Ok(Array1::from_elem(capture.num_events(), true));
        }
        let gates = gates
            .iter()
            .map(|(amplitude, threshold)| (amplitude.view(), *threshold))
            .collect::<Vec<_>>();
        Ok(selection::coincidence_mask(&gates))
    })?;
    let selected = selection::selected_events(mask.view());
    tracing::Span::current().record("selected", selected.len());

    let options = CrossingOptions::from(&config.root_finding);
    let transconductance = config.active_transconductance();
    let mut channels = BTreeMap::new();
    let mut crossing_times = BTreeMap::new();
    for (&channel, waveforms) in &normalized {
        let _guard = info_span!("channel", channel).entered();
        let masked = selection::select_events(waveforms.view(), &selected);

        let feature_error = |source| PipelineError::Feature { channel, source };
        let amplitude = features::amplitude(masked.view()).map_err(feature_error)?;
        let charge = features::charge(
            masked.view(),
            capture.sample_interval(),
            transconductance,
            config.charge_norm,
        )
        .map_err(feature_error)?;
        channels.insert(channel, ChannelFeatures { amplitude, charge });

        let times = features::crossing_times(
            waveforms.view(),
            config.crossing_fractions[channel],
            capture.sample_interval(),
            &options,
            file_deadline,
        )
        .map_err(|source| PipelineError::Crossing { channel, source })?;
        crossing_times.insert(channel, times);
    }

    if !capture.is_active(config.trigger_channel) {
        warn!(
            channel = config.trigger_channel,
            "Trigger channel inactive, no timing differences"
        );
    }

    Ok(CaptureFeatures {
        num_events: capture.num_events(),
        mask,
        channels,
        crossing_times: CrossingTimes::new(config.trigger_channel, crossing_times),
    })
}
