use crate::{
    graphics::GraphSaver,
    loader::{LoadError, load_capture},
    report::{report_directory, write_report},
};
use metrics::counter;
use scope_common::{
    is_valid_crossing_time,
    metrics::{
        failures::FailureKind,
        names::{CROSSING_TIMES_NOT_FOUND, EVENTS_PROCESSED, EVENTS_SELECTED},
    },
};
use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;
use waveform_features::{PipelineError, ScopeConfig, process_capture};

#[derive(Debug, Error)]
pub(crate) enum ProcessingError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Failed to write report: {0}")]
    Report(miette::Report),
}

impl ProcessingError {
    pub(crate) fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Load(LoadError::Hdf5 { .. }) => FailureKind::CaptureLoadFailed,
            Self::Load(_) => FailureKind::MalformedCapture,
            Self::Pipeline(PipelineError::Config(_)) => FailureKind::InvalidConfiguration,
            Self::Pipeline(e) if e.is_timeout() => FailureKind::TimedOut,
            Self::Pipeline(e) if e.is_root_find_failure() => FailureKind::RootFindFailed,
            Self::Pipeline(_) => FailureKind::FeatureExtractionFailed,
            Self::Report(_) => FailureKind::ReportWriteFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcessingOutcome {
    pub(crate) events: usize,
    pub(crate) selected: usize,
}

/// Handles a single capture file.
pub(crate) trait FileProcessor {
    fn process(&mut self, path: &Path) -> Result<ProcessingOutcome, ProcessingError>;
}

/// Loads a capture, extracts its features and writes its report into a
/// directory of `output_dir` named after the file.
pub(crate) struct CaptureProcessor<G> {
    config: ScopeConfig,
    output_dir: PathBuf,
    _saver: PhantomData<G>,
}

impl<G: GraphSaver> CaptureProcessor<G> {
    pub(crate) fn new(config: ScopeConfig, output_dir: PathBuf) -> Self {
        Self {
            config,
            output_dir,
            _saver: PhantomData,
        }
    }
}

impl<G: GraphSaver> FileProcessor for CaptureProcessor<G> {
    #[tracing::instrument(skip_all, fields(path = %path.display(), events, selected))]
    fn process(&mut self, path: &Path) -> Result<ProcessingOutcome, ProcessingError> {
        let capture = load_capture(path)?;
        let features = process_capture(&capture, &self.config)?;

        let directory = report_directory(&self.output_dir, path);
        write_report::<G>(
            &directory,
            path,
            &features,
            capture.attributes(),
            &self.config.report,
        )
        .map_err(ProcessingError::Report)?;

        let outcome = ProcessingOutcome {
            events: features.num_events,
            selected: features.num_selected(),
        };
        let not_found = features
            .crossing_times
            .all()
            .flat_map(|(_, times)| times.iter())
            .filter(|&&time| !is_valid_crossing_time(time))
            .count();

        counter!(EVENTS_PROCESSED).increment(outcome.events as u64);
        counter!(EVENTS_SELECTED).increment(outcome.selected as u64);
        counter!(CROSSING_TIMES_NOT_FOUND).increment(not_found as u64);

        tracing::Span::current()
            .record("events", outcome.events)
            .record("selected", outcome.selected);
        info!(report = %directory.display(), "Processed capture");
        Ok(outcome)
    }
}
