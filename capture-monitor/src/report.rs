//! Writes the figures and the JSON summary of one processed capture.
use crate::graphics::{FIGURE_SIZE, GraphSaver, HistogramPlot};
use chrono::{DateTime, Utc};
use miette::IntoDiagnostic;
use scope_common::{channel_label, is_valid_crossing_time};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{File, create_dir_all},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use waveform_features::{
    AttributeValue, CaptureFeatures, Real,
    config::{HistogramSettings, ReportSettings},
    statistics::{GaussianFit, Histogram, Summary, fit_gaussian},
};

const SUMMARY_FILE: &str = "summary.json";

/// Statistics of one histogrammed feature, with the Gaussian refinement
/// when it was requested and succeeded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct HistogramSummary {
    #[serde(flatten)]
    pub(crate) summary: Summary,
    pub(crate) fit: Option<GaussianFit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ChannelSummary {
    pub(crate) amplitude: Summary,
    pub(crate) charge: Summary,
    pub(crate) crossing_time: Option<HistogramSummary>,
    pub(crate) crossing_difference: Option<HistogramSummary>,
    pub(crate) crossing_times_not_found: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ReportSummary<'a> {
    pub(crate) source: &'a Path,
    pub(crate) generated: DateTime<Utc>,
    pub(crate) events: usize,
    pub(crate) selected_events: usize,
    /// Keyed by the channel number shown on the scope.
    pub(crate) channels: BTreeMap<usize, ChannelSummary>,
    pub(crate) attributes: &'a BTreeMap<String, AttributeValue>,
}

/// The directory holding the report of the capture at `source`.
pub(crate) fn report_directory(output_dir: &Path, source: &Path) -> PathBuf {
    let stem = source.file_stem().unwrap_or(source.as_os_str());
    output_dir.join(stem)
}

/// Renders the report of one capture into `directory`, creating it if needed.
///
/// # Parameters
/// - source: the capture file, recorded in the summary.
/// - features: the output of the pipeline for the capture.
/// - attributes: the capture's additional attributes, copied to the summary.
///
/// # Error Modes
/// - Fails if the directory or any file in it cannot be written.
#[tracing::instrument(skip_all, fields(directory = %directory.display()))]
pub(crate) fn write_report<'a, G: GraphSaver>(
    directory: &Path,
    source: &'a Path,
    features: &CaptureFeatures,
    attributes: &'a BTreeMap<String, AttributeValue>,
    settings: &ReportSettings,
) -> miette::Result<ReportSummary<'a>> {
    create_dir_all(directory).into_diagnostic()?;
    let renderer = Renderer::<G> {
        directory,
        _saver: PhantomData,
    };

    let differences = features.crossing_times.differences();
    let trigger = features.crossing_times.trigger().map(|(channel, _)| channel);
    let mut channels = BTreeMap::new();
    for (&channel, channel_features) in &features.channels {
        let label = channel_label(channel);
        let title = format!("Channel {label}");

        let amplitude = renderer.histogram(
            &format!("amplitude_ch{label}"),
            &title,
            "Amplitude (V)",
            &settings.amplitude,
            &channel_features.amplitude.to_vec(),
            false,
        )?;
        let charge = renderer.histogram(
            &format!("charge_ch{label}"),
            &title,
            "Charge (fC)",
            &settings.charge,
            &channel_features.charge.to_vec(),
            false,
        )?;

        let (crossing_time, crossing_times_not_found) =
            match features.crossing_times.all().find(|(c, _)| *c == channel) {
                Some((_, times)) => {
                    let valid = valid_crossing_times(times.iter());
                    let not_found = times.len() - valid.len();
                    let summary = renderer.histogram(
                        &format!("crossing_ch{label}"),
                        &title,
                        "Time (s)",
                        &settings.crossing_time,
                        &valid,
                        settings.fit_timing,
                    )?;
                    (Some(summary), not_found)
                }
                None => (None, 0),
            };

        let crossing_difference = match (differences.get(&channel), trigger) {
            (Some(difference), Some(trigger)) => Some(renderer.histogram(
                &format!("crossing_diff_ch{label}"),
                &format!("Channel {label} - Channel {}", channel_label(trigger)),
                "Time (s)",
                &settings.crossing_difference,
                &difference.to_vec(),
                settings.fit_timing,
            )?),
            _ => None,
        };

        channels.insert(
            label,
            ChannelSummary {
                amplitude: amplitude.summary,
                charge: charge.summary,
                crossing_time,
                crossing_difference,
                crossing_times_not_found,
            },
        );
    }

    let summary = ReportSummary {
        source,
        generated: Utc::now(),
        events: features.num_events,
        selected_events: features.num_selected(),
        channels,
        attributes,
    };
    let file = File::create(directory.join(SUMMARY_FILE)).into_diagnostic()?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary).into_diagnostic()?;
    debug!("Wrote report");
    Ok(summary)
}

fn valid_crossing_times<'a>(times: impl Iterator<Item = &'a Real>) -> Vec<Real> {
    times
        .copied()
        .filter(|&time| is_valid_crossing_time(time))
        .collect()
}

struct Renderer<'a, G> {
    directory: &'a Path,
    _saver: PhantomData<G>,
}

impl<G: GraphSaver> Renderer<'_, G> {
    /// Saves the histogram of `values` under `name` and returns its statistics.
    fn histogram(
        &self,
        name: &str,
        title: &str,
        x_label: &'static str,
        settings: &HistogramSettings,
        values: &[Real],
        fit: bool,
    ) -> miette::Result<HistogramSummary> {
        let histogram = Histogram::new(values, settings.bins, settings.range);
        let summary = Summary::new(values);
        let fit = fit.then(|| refine(name, &histogram, &summary)).flatten();

        let plot = HistogramPlot {
            title: title.to_owned(),
            x_label,
            histogram: &histogram,
            summary: &summary,
            fit: fit.as_ref(),
        };
        let path = G::format().build_path(self.directory, name);
        G::save_histogram(&plot, &path, FIGURE_SIZE)?;
        Ok(HistogramSummary { summary, fit })
    }
}

fn refine(name: &str, histogram: &Histogram, summary: &Summary) -> Option<GaussianFit> {
    let (Some(mean), Some(sigma)) = (summary.mean, summary.sigma) else {
        warn!(histogram = name, "Too few values for Gaussian fit");
        return None;
    };
    fit_gaussian(histogram, mean, sigma)
        .inspect_err(|e| warn!(histogram = name, "Gaussian fit failed: {e}"))
        .ok()
}
