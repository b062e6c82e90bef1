//! Watches a directory for oscilloscope captures and writes a report of
//! histograms for each new one.
mod graphics;
mod ledger;
mod loader;
mod processing;
mod report;
mod watcher;

use anyhow::Context;
use clap::Parser;
use ledger::{FileLedger, InMemoryLedger, ProcessedStore};
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusBuilder;
use processing::{CaptureProcessor, FileProcessor};
use scope_common::{
    init_tracer,
    metrics::{
        component_info_metric,
        names::{
            CROSSING_TIMES_NOT_FOUND, EVENTS_PROCESSED, EVENTS_SELECTED, FAILURES,
            FILES_DISCOVERED, FILES_PROCESSED,
        },
    },
    tracer::TracerOptions,
};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
    time,
};
use tracing::{info, warn};
use waveform_features::ScopeConfig;
use watcher::Watcher;

use crate::graphics::SvgSaver;

/// [clap] derived struct to parse command line arguments.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Directory searched for capture files.
    #[clap(long)]
    input_dir: PathBuf,

    /// Directory in which a report directory is created per capture, defaults to the parent of the input directory.
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// JSON file of scope settings, the built-in settings are used if absent.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Glob matched against file names in the input directory.
    #[clap(long, default_value = "*.hdf5")]
    pattern: String,

    /// Milliseconds between searches of the input directory.
    #[clap(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// File listing the captures already processed, which persists across restarts. If absent the list is kept in memory.
    #[clap(long)]
    ledger: Option<PathBuf>,

    /// Forget every capture in the ledger before starting.
    #[clap(long)]
    reset_ledger: bool,

    /// Process the pending captures once, then exit.
    #[clap(long)]
    once: bool,

    /// If set, then OpenTelemetry data is sent to the URL specified, otherwise the standard tracing subscriber is used.
    #[clap(long)]
    otel_endpoint: Option<String>,

    /// All OpenTelemetry spans are emitted with this as the "service.namespace" property. Can be used to track different instances of the monitor running in parallel.
    #[clap(long, default_value = "")]
    otel_namespace: String,

    /// Endpoint on which OpenMetrics flavour metrics are available.
    #[clap(long, default_value = "127.0.0.1:9090")]
    observability_address: SocketAddr,
}

impl Cli {
    fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            self.input_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.input_dir.clone())
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions::new(
        args.otel_endpoint.as_deref(),
        args.otel_namespace.clone()
    ));

    // Install exporter and register metrics
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(args.observability_address)
        .install()
        .context("Prometheus metrics exporter should be set up")?;
    register_metrics();

    let config = match &args.config {
        Some(path) => ScopeConfig::from_json_file(path)
            .with_context(|| format!("Cannot load scope settings from {}", path.display()))?,
        None => ScopeConfig::default(),
    };
    let output_dir = args.output_dir();
    info!(
        input = %args.input_dir.display(),
        output = %output_dir.display(),
        "Watching for captures"
    );
    let processor = CaptureProcessor::<SvgSaver>::new(config, output_dir);

    match &args.ledger {
        Some(path) => {
            let ledger = FileLedger::open(path)
                .with_context(|| format!("Cannot open ledger {}", path.display()))?;
            run(&args, processor, ledger).await
        }
        None => run(&args, processor, InMemoryLedger::default()).await,
    }
}

fn register_metrics() {
    component_info_metric("capture-monitor");

    metrics::describe_counter!(
        FILES_DISCOVERED,
        Unit::Count,
        "Number of unprocessed capture files found"
    );
    metrics::describe_counter!(
        FILES_PROCESSED,
        Unit::Count,
        "Number of capture files successfully processed"
    );
    metrics::describe_counter!(
        EVENTS_PROCESSED,
        Unit::Count,
        "Number of events in processed captures"
    );
    metrics::describe_counter!(
        EVENTS_SELECTED,
        Unit::Count,
        "Number of events passing the coincidence mask"
    );
    metrics::describe_counter!(
        CROSSING_TIMES_NOT_FOUND,
        Unit::Count,
        "Number of events on any channel without a crossing time"
    );
    metrics::describe_counter!(FAILURES, Unit::Count, "Number of failures encountered");
}

/// Polls the input directory until interrupted, or once with `--once`.
async fn run<P: FileProcessor, S: ProcessedStore>(
    args: &Cli,
    processor: P,
    store: S,
) -> anyhow::Result<()> {
    let mut watcher = Watcher::new(&args.input_dir, &args.pattern, processor, store)?;
    if args.reset_ledger {
        watcher.reset().context("Cannot reset ledger")?;
    }

    let (stop_sender, mut stop) = watch::channel(false);
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        let _ = stop_sender.send(true);
    });
    let stop_requested = {
        let stop = stop.clone();
        move || *stop.borrow()
    };

    if args.once {
        let summary = watcher.poll(&stop_requested)?;
        info!(?summary, "Processed pending captures");
        return Ok(());
    }

    let mut interval = time::interval(Duration::from_millis(args.poll_interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = watcher.poll(&stop_requested)?;
                if summary.stopped {
                    break;
                }
            }
            changed = stop.changed() => {
                if changed.is_err() {
                    warn!("Signal handler stopped");
                }
                break;
            }
        }
    }
    info!("Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_defaults_to_one_second() {
        let cli = Cli::try_parse_from(["capture-monitor", "--input-dir", "data/captures"]).unwrap();
        assert_eq!(cli.poll_interval_ms, 1000);
        assert_eq!(cli.output_dir(), PathBuf::from("data"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let result = Cli::try_parse_from([
            "capture-monitor",
            "--input-dir",
            "captures",
            "--poll-interval-ms",
            "0",
        ]);
        assert!(result.is_err());
    }
}
