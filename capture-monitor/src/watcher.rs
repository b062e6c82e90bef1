use crate::{
    ledger::ProcessedStore,
    processing::{FileProcessor, ProcessingOutcome},
};
use glob::{MatchOptions, Pattern, glob_with};
use metrics::counter;
use scope_common::metrics::{
    failures::{FailureKind, get_label},
    names::{FAILURES, FILES_DISCOVERED, FILES_PROCESSED},
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub(crate) enum WatchError {
    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Tally of one poll of the input directory.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollSummary {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
    pub(crate) stopped: bool,
}

/// Finds new capture files in a directory and hands them, in name order,
/// to a [FileProcessor], remembering each one in a [ProcessedStore].
pub(crate) struct Watcher<P, S> {
    pattern: String,
    processor: P,
    store: S,
}

impl<P: FileProcessor, S: ProcessedStore> Watcher<P, S> {
    /// # Parameters
    /// - input_dir: directory searched for captures.
    /// - pattern: glob matched against file names in `input_dir`.
    ///
    /// # Error Modes
    /// - Fails if `pattern` is not a valid glob.
    pub(crate) fn new(
        input_dir: &Path,
        pattern: &str,
        processor: P,
        store: S,
    ) -> Result<Self, WatchError> {
        Pattern::new(pattern)?;
        let pattern = Pattern::escape(&input_dir.to_string_lossy()) + "/" + pattern;
        Ok(Self {
            pattern,
            processor,
            store,
        })
    }

    /// Files matching the pattern which are not yet in the store, sorted.
    pub(crate) fn pending(&self) -> Result<Vec<PathBuf>, WatchError> {
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..Default::default()
        };
        let mut paths = glob_with(&self.pattern, options)?
            .filter_map(|entry| {
                entry
                    .inspect_err(|e| warn!("Cannot read directory entry: {e}"))
                    .ok()
            })
            .filter(|path| path.is_file() && !self.store.contains(path))
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    /// Processes every pending file, stopping early once `stop` returns true.
    ///
    /// A file which fails is logged, counted and recorded like any other,
    /// so it is not retried on the next poll.
    #[tracing::instrument(skip_all, fields(pending))]
    pub(crate) fn poll(&mut self, stop: impl Fn() -> bool) -> Result<PollSummary, WatchError> {
        let pending = self.pending()?;
        tracing::Span::current().record("pending", pending.len());
        counter!(FILES_DISCOVERED).increment(pending.len() as u64);

        let mut summary = PollSummary::default();
        for path in pending {
            if stop() {
                info!("Stopping before {}", path.display());
                summary.stopped = true;
                break;
            }
            match self.processor.process(&path) {
                Ok(ProcessingOutcome { events, selected }) => {
                    debug!(events, selected, "Processed {}", path.display());
                    counter!(FILES_PROCESSED).increment(1);
                    summary.processed += 1;
                }
                Err(e) => {
                    error!("Failed to process {}: {e}", path.display());
                    counter!(FAILURES, &[get_label(e.failure_kind())]).increment(1);
                    summary.failed += 1;
                }
            }
            if let Err(e) = self.store.record(&path) {
                error!("Failed to record {} in ledger: {e}", path.display());
                counter!(FAILURES, &[get_label(FailureKind::LedgerWriteFailed)]).increment(1);
            }
        }
        Ok(summary)
    }

    /// Forgets every processed file, so all matching files are processed again.
    pub(crate) fn reset(&mut self) -> std::io::Result<()> {
        self.store.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ledger::InMemoryLedger, loader::LoadError, processing::ProcessingError};
    use std::{cell::Cell, env, fs};

    #[derive(Default)]
    struct FakeProcessor {
        seen: Vec<PathBuf>,
    }

    impl FileProcessor for FakeProcessor {
        fn process(&mut self, path: &Path) -> Result<ProcessingOutcome, ProcessingError> {
            self.seen.push(path.to_owned());
            if path.to_string_lossy().contains("bad") {
                Err(ProcessingError::Load(LoadError::InvalidSampleCount {
                    value: -1.0,
                    hdf5_path: None,
                }))
            } else {
                Ok(ProcessingOutcome {
                    events: 10,
                    selected: 5,
                })
            }
        }
    }

    fn create_test_directory(name: &str, files: &[&str]) -> PathBuf {
        let mut path = env::temp_dir();
        path.push(format!("capture_monitor_watcher_{name}"));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        for file in files {
            fs::write(path.join(file), b"").unwrap();
        }
        path
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn pending_files_sorted_and_filtered() {
        let directory = create_test_directory(
            "pending",
            &["run_2.hdf5", "run_1.hdf5", "notes.txt", ".hidden.hdf5"],
        );
        let mut ledger = InMemoryLedger::default();
        ledger.record(&directory.join("run_2.hdf5")).unwrap();

        let watcher =
            Watcher::new(&directory, "*.hdf5", FakeProcessor::default(), ledger).unwrap();
        assert_eq!(file_names(&watcher.pending().unwrap()), vec!["run_1.hdf5"]);

        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn failures_are_recorded_and_not_retried() {
        let directory =
            create_test_directory("failures", &["a.hdf5", "b_bad.hdf5", "c.hdf5"]);
        let mut watcher = Watcher::new(
            &directory,
            "*.hdf5",
            FakeProcessor::default(),
            InMemoryLedger::default(),
        )
        .unwrap();

        let summary = watcher.poll(|| false).unwrap();
        assert_eq!(
            summary,
            PollSummary {
                processed: 2,
                failed: 1,
                stopped: false
            }
        );
        assert_eq!(
            file_names(&watcher.processor.seen),
            vec!["a.hdf5", "b_bad.hdf5", "c.hdf5"]
        );

        assert_eq!(watcher.poll(|| false).unwrap(), PollSummary::default());
        assert_eq!(watcher.processor.seen.len(), 3);

        fs::write(directory.join("d.hdf5"), b"").unwrap();
        let summary = watcher.poll(|| false).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(file_names(&watcher.processor.seen[3..]), vec!["d.hdf5"]);

        watcher.reset().unwrap();
        assert_eq!(watcher.pending().unwrap().len(), 4);

        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn stops_between_files() {
        let directory = create_test_directory("stop", &["a.hdf5", "b.hdf5", "c.hdf5"]);
        let mut watcher = Watcher::new(
            &directory,
            "*.hdf5",
            FakeProcessor::default(),
            InMemoryLedger::default(),
        )
        .unwrap();

        let calls = Cell::new(0);
        let summary = watcher
            .poll(|| {
                calls.set(calls.get() + 1);
                calls.get() > 1
            })
            .unwrap();
        assert_eq!(
            summary,
            PollSummary {
                processed: 1,
                failed: 0,
                stopped: true
            }
        );
        assert_eq!(file_names(&watcher.pending().unwrap()), vec!["b.hdf5", "c.hdf5"]);

        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn invalid_pattern() {
        let directory = create_test_directory("invalid_pattern", &[]);
        let result = Watcher::new(
            &directory,
            "[",
            FakeProcessor::default(),
            InMemoryLedger::default(),
        );
        assert!(matches!(result, Err(WatchError::Pattern(_))));
        let _ = fs::remove_dir_all(&directory);
    }
}
