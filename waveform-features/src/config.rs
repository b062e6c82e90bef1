use crate::budget::TimingBudget;
use scope_common::{CHANNELS_PER_SCOPE, Channel, Real};
use serde::Deserialize;
use std::{fs, ops::Deref, path::Path};
use strum::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Crossing fraction {value} of channel {channel} is not in (0,1)")]
    CrossingFraction { channel: Channel, value: Real },
    #[error("Post-gain {value} of channel {channel} is not a non-zero finite number")]
    PostGain { channel: Channel, value: Real },
    #[error("Gain {0} is not a non-zero finite number")]
    InvalidGain(Real),
    #[error("Transconductance {value} for {mode} is not positive")]
    Transconductance { mode: GainMode, value: Real },
    #[error("Trigger channel {0} does not exist")]
    TriggerChannel(Channel),
    #[error("Coincidence channel {0} does not exist")]
    CoincidenceChannel(Channel),
    #[error("Coincidence threshold {value} of channel {channel} is not finite")]
    CoincidenceThreshold { channel: Channel, value: Real },
    #[error("Pedestal window of {window} samples must be non-zero and shorter than the {samples} samples per event")]
    PedestalWindow { window: usize, samples: usize },
    #[error("Pedestal window must be non-zero")]
    ZeroPedestalWindow,
    #[error("Charge normalisation {0} is not a non-zero finite number")]
    ChargeNorm(Real),
    #[error("Root finder must be allowed at least one iteration")]
    ZeroIterations,
    #[error("Histogram '{histogram}' must have at least one bin")]
    HistogramBins { histogram: &'static str },
    #[error("Histogram '{histogram}' range [{min}, {max}) is empty or not finite")]
    HistogramRange {
        histogram: &'static str,
        min: Real,
        max: Real,
    },
    #[error("Cannot read configuration: {0}")]
    Read(#[from] std::io::Error),
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GainMode {
    HighGain,
    LowGain,
}

/// Relates the integrated voltage of the preamplifier output to the
/// charge collected, one value per preamplifier gain mode (ohms).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Transconductance {
    pub high_gain: Real,
    pub low_gain: Real,
}

impl Transconductance {
    pub fn for_mode(&self, mode: GainMode) -> Real {
        match mode {
            GainMode::HighGain => self.high_gain,
            GainMode::LowGain => self.low_gain,
        }
    }
}

/// What to record when the root finder fails on an event.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RootFailurePolicy {
    /// Fail the whole capture.
    #[default]
    Abort,
    /// Record the not-found sentinel for the event and carry on.
    Sentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CoincidenceChannel {
    pub channel: Channel,
    /// Minimum amplitude (V) an event must exceed on this channel.
    pub threshold: Real,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RootFinding {
    pub max_iterations: usize,
    pub on_failure: RootFailurePolicy,
    pub budget: TimingBudget,
}

impl Default for RootFinding {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            on_failure: RootFailurePolicy::default(),
            budget: TimingBudget::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HistogramSettings {
    pub bins: usize,
    /// Spans the data when absent.
    #[serde(default)]
    pub range: Option<(Real, Real)>,
}

impl HistogramSettings {
    fn validate(&self, histogram: &'static str) -> Result<(), ConfigError> {
        if self.bins == 0 {
            return Err(ConfigError::HistogramBins { histogram });
        }
        if let Some((min, max)) = self.range {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(ConfigError::HistogramRange {
                    histogram,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReportSettings {
    pub amplitude: HistogramSettings,
    pub charge: HistogramSettings,
    pub crossing_time: HistogramSettings,
    pub crossing_difference: HistogramSettings,
    /// Refine the timing mean and sigma with a Gaussian fit.
    pub fit_timing: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            amplitude: HistogramSettings {
                bins: 100,
                range: Some((0.0, 0.3)),
            },
            charge: HistogramSettings {
                bins: 200,
                range: Some((0.0, 10.0)),
            },
            crossing_time: HistogramSettings {
                bins: 20,
                range: None,
            },
            crossing_difference: HistogramSettings {
                bins: 20,
                range: None,
            },
            fit_timing: false,
        }
    }
}

/// The scope's settings as written in the configuration file.
/// Only usable for processing once validated into a [ScopeConfig].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScopeSettings {
    pub trigger_channel: Channel,
    pub transconductance: Transconductance,
    pub gain_mode: GainMode,
    /// Divides the pedestal-subtracted voltage of each channel.
    pub post_gains: [Real; CHANNELS_PER_SCOPE],
    /// Fraction of each event's peak at which its crossing time is taken.
    pub crossing_fractions: [Real; CHANNELS_PER_SCOPE],
    /// Number of leading samples averaged to estimate the pedestal.
    pub pedestal_window: usize,
    /// Converts coulombs to the reported charge unit (1e15 for fC).
    pub charge_norm: Real,
    pub coincidence: Vec<CoincidenceChannel>,
    pub root_finding: RootFinding,
    pub report: ReportSettings,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        let coincidence = (0..3)
            .map(|channel| CoincidenceChannel {
                channel,
                threshold: 0.015,
            })
            .collect();
        Self {
            trigger_channel: 2,
            transconductance: Transconductance {
                high_gain: 15.7e3,
                low_gain: 4.4e3,
            },
            gain_mode: GainMode::LowGain,
            post_gains: [-1.0, -1.0, -1.0, 1.0],
            crossing_fractions: [0.2, 0.2, 0.2, 0.5],
            pedestal_window: 400,
            charge_norm: 1e15,
            coincidence,
            root_finding: RootFinding::default(),
            report: ReportSettings::default(),
        }
    }
}

impl ScopeSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        for (channel, &value) in self.crossing_fractions.iter().enumerate() {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::CrossingFraction { channel, value });
            }
        }
        for (channel, &value) in self.post_gains.iter().enumerate() {
            if value == 0.0 || !value.is_finite() {
                return Err(ConfigError::PostGain { channel, value });
            }
        }
        for mode in [GainMode::HighGain, GainMode::LowGain] {
            let value = self.transconductance.for_mode(mode);
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Transconductance { mode, value });
            }
        }
        if self.trigger_channel >= CHANNELS_PER_SCOPE {
            return Err(ConfigError::TriggerChannel(self.trigger_channel));
        }
        for coincidence in &self.coincidence {
            if coincidence.channel >= CHANNELS_PER_SCOPE {
                return Err(ConfigError::CoincidenceChannel(coincidence.channel));
            }
            if !coincidence.threshold.is_finite() {
                return Err(ConfigError::CoincidenceThreshold {
                    channel: coincidence.channel,
                    value: coincidence.threshold,
                });
            }
        }
        if self.pedestal_window == 0 {
            return Err(ConfigError::ZeroPedestalWindow);
        }
        if self.charge_norm == 0.0 || !self.charge_norm.is_finite() {
            return Err(ConfigError::ChargeNorm(self.charge_norm));
        }
        if self.root_finding.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        self.report.amplitude.validate("amplitude")?;
        self.report.charge.validate("charge")?;
        self.report.crossing_time.validate("crossing-time")?;
        self.report.crossing_difference.validate("crossing-difference")?;
        Ok(())
    }
}

/// Validated, immutable scope settings, shared read-only by every stage
/// of processing for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ScopeSettings")]
pub struct ScopeConfig(ScopeSettings);

impl ScopeConfig {
    pub fn new(settings: ScopeSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self(settings))
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: ScopeSettings = serde_json::from_str(json)?;
        Self::new(settings)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// The transconductance of the configured gain mode.
    pub fn active_transconductance(&self) -> Real {
        self.0.transconductance.for_mode(self.0.gain_mode)
    }

    /// Rejects pedestal windows that would leave no signal region.
    pub fn check_samples_per_event(&self, samples: usize) -> Result<(), ConfigError> {
        if self.0.pedestal_window >= samples {
            Err(ConfigError::PedestalWindow {
                window: self.0.pedestal_window,
                samples,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self(ScopeSettings::default())
    }
}

impl TryFrom<ScopeSettings> for ScopeConfig {
    type Error = ConfigError;

    fn try_from(settings: ScopeSettings) -> Result<Self, Self::Error> {
        Self::new(settings)
    }
}

impl Deref for ScopeConfig {
    type Target = ScopeSettings;

    fn deref(&self) -> &ScopeSettings {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = ScopeConfig::new(ScopeSettings::default()).unwrap();
        assert_eq!(config.trigger_channel, 2);
        assert_eq!(config.active_transconductance(), 4.4e3);
        assert_eq!(config.coincidence.len(), 3);
        assert_eq!(config.root_finding.max_iterations, 500);
        assert_eq!(config.root_finding.on_failure, RootFailurePolicy::Abort);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ScopeConfig::from_json_str(
            r#"{
                "trigger-channel": 0,
                "gain-mode": "high-gain",
                "crossing-fractions": [0.3, 0.3, 0.3, 0.3],
                "root-finding": {
                    "on-failure": "sentinel",
                    "budget": { "file-timeout-ms": 2000 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.trigger_channel, 0);
        assert_eq!(config.active_transconductance(), 15.7e3);
        assert_eq!(config.crossing_fractions, [0.3; 4]);
        assert_eq!(config.pedestal_window, 400);
        assert_eq!(config.root_finding.on_failure, RootFailurePolicy::Sentinel);
        assert_eq!(config.root_finding.max_iterations, 500);
        assert_eq!(
            config.root_finding.budget.file,
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = ScopeConfig::from_json_str(r#"{ "trigger": 2 }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn deserialize_validates() {
        let result: Result<ScopeConfig, _> =
            serde_json::from_str(r#"{ "crossing-fractions": [0.2, 0.2, 1.0, 0.5] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn crossing_fraction_out_of_range() {
        for value in [0.0, 1.0, -0.2, 1.5, Real::NAN] {
            let mut settings = ScopeSettings::default();
            settings.crossing_fractions[1] = value;
            assert!(matches!(
                ScopeConfig::new(settings),
                Err(ConfigError::CrossingFraction { channel: 1, .. })
            ));
        }
    }

    #[test]
    fn zero_post_gain() {
        let mut settings = ScopeSettings::default();
        settings.post_gains[3] = 0.0;
        assert!(matches!(
            ScopeConfig::new(settings),
            Err(ConfigError::PostGain { channel: 3, .. })
        ));
    }

    #[test]
    fn trigger_channel_out_of_range() {
        let settings = ScopeSettings {
            trigger_channel: 4,
            ..Default::default()
        };
        assert!(matches!(
            ScopeConfig::new(settings),
            Err(ConfigError::TriggerChannel(4))
        ));
    }

    #[test]
    fn negative_transconductance() {
        let mut settings = ScopeSettings::default();
        settings.transconductance.high_gain = -1.0;
        assert!(matches!(
            ScopeConfig::new(settings),
            Err(ConfigError::Transconductance {
                mode: GainMode::HighGain,
                ..
            })
        ));
    }

    #[test]
    fn empty_histogram_range() {
        let mut settings = ScopeSettings::default();
        settings.report.charge.range = Some((1.0, 1.0));
        assert!(matches!(
            ScopeConfig::new(settings),
            Err(ConfigError::HistogramRange {
                histogram: "charge",
                ..
            })
        ));
    }

    #[test]
    fn pedestal_window_must_leave_signal() {
        let config = ScopeConfig::default();
        assert!(config.check_samples_per_event(401).is_ok());
        assert!(matches!(
            config.check_samples_per_event(400),
            Err(ConfigError::PedestalWindow {
                window: 400,
                samples: 400
            })
        ));
    }
}
