//! Records which capture files have already been handled.
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Set of files which the watcher must not process again.
///
/// Files are recorded whether their processing succeeded or failed, and are
/// only forgotten by an explicit [ProcessedStore::reset].
pub(crate) trait ProcessedStore {
    fn contains(&self, path: &Path) -> bool;

    fn record(&mut self, path: &Path) -> io::Result<()>;

    fn reset(&mut self) -> io::Result<()>;
}

#[derive(Default, Debug)]
pub(crate) struct InMemoryLedger {
    processed: HashSet<PathBuf>,
}

impl ProcessedStore for InMemoryLedger {
    fn contains(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    fn record(&mut self, path: &Path) -> io::Result<()> {
        self.processed.insert(path.to_owned());
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        self.processed.clear();
        Ok(())
    }
}

/// A ledger persisted as a text file holding one path per line.
///
/// The file is read when the ledger is opened and appended to as files
/// are recorded, so the ledger survives restarts.
#[derive(Debug)]
pub(crate) struct FileLedger {
    path: PathBuf,
    file: File,
    processed: InMemoryLedger,
}

impl FileLedger {
    /// Opens the ledger at `path`, creating it if it doesn't exist.
    ///
    /// # Error Modes
    /// - Fails if the file cannot be created, opened or read.
    #[tracing::instrument(skip_all, fields(path = %path.display(), entries))]
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        let mut processed = InMemoryLedger::default();
        match File::open(path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    if !line.is_empty() {
                        processed.record(Path::new(&line))?;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tracing::Span::current().record("entries", processed.processed.len());
        info!("Opened ledger");

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_owned(),
            file,
            processed,
        })
    }
}

impl ProcessedStore for FileLedger {
    fn contains(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    fn record(&mut self, path: &Path) -> io::Result<()> {
        if self.processed.contains(path) {
            return Ok(());
        }
        writeln!(self.file, "{}", path.display())?;
        self.file.flush()?;
        self.processed.record(path)
    }

    fn reset(&mut self) -> io::Result<()> {
        debug!(path = %self.path.display(), "Clearing ledger");
        self.file.set_len(0)?;
        self.processed.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn create_test_filename(name: &str) -> PathBuf {
        let mut path = env::temp_dir();
        path.push(format!("capture_monitor_ledger_{name}.txt"));
        path
    }

    #[test]
    fn in_memory_records_and_resets() {
        let mut ledger = InMemoryLedger::default();
        assert!(!ledger.contains(Path::new("/data/a.hdf5")));

        ledger.record(Path::new("/data/a.hdf5")).unwrap();
        assert!(ledger.contains(Path::new("/data/a.hdf5")));
        assert!(!ledger.contains(Path::new("/data/b.hdf5")));

        ledger.reset().unwrap();
        assert!(!ledger.contains(Path::new("/data/a.hdf5")));
    }

    #[test]
    fn persists_across_reopening() {
        let filename = create_test_filename("persists");
        let _ = fs::remove_file(&filename);

        {
            let mut ledger = FileLedger::open(&filename).unwrap();
            ledger.record(Path::new("/data/a.hdf5")).unwrap();
            ledger.record(Path::new("/data/b.hdf5")).unwrap();
            ledger.record(Path::new("/data/a.hdf5")).unwrap();
        }

        let ledger = FileLedger::open(&filename).unwrap();
        assert!(ledger.contains(Path::new("/data/a.hdf5")));
        assert!(ledger.contains(Path::new("/data/b.hdf5")));
        assert!(!ledger.contains(Path::new("/data/c.hdf5")));
        assert_eq!(
            fs::read_to_string(&filename).unwrap(),
            "/data/a.hdf5\n/data/b.hdf5\n"
        );

        let _ = fs::remove_file(&filename);
    }

    #[test]
    fn reset_clears_file() {
        let filename = create_test_filename("reset");
        let _ = fs::remove_file(&filename);

        {
            let mut ledger = FileLedger::open(&filename).unwrap();
            ledger.record(Path::new("/data/a.hdf5")).unwrap();
            ledger.reset().unwrap();
            assert!(!ledger.contains(Path::new("/data/a.hdf5")));
            ledger.record(Path::new("/data/b.hdf5")).unwrap();
        }

        let ledger = FileLedger::open(&filename).unwrap();
        assert!(!ledger.contains(Path::new("/data/a.hdf5")));
        assert!(ledger.contains(Path::new("/data/b.hdf5")));

        let _ = fs::remove_file(&filename);
    }
}
