use metrics::{describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "capture_monitor_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    let git_rev = option_env!("GIT_VERSION").unwrap_or("unknown");
    gauge!(NAME, "component" => name, "git_version" => git_rev).set(1);
}

pub mod names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "capture_monitor_";

    pub const FAILURES: &str = concatcp!(METRIC_NAME_PREFIX, "failures");
    pub const FILES_DISCOVERED: &str = concatcp!(METRIC_NAME_PREFIX, "files_discovered");
    pub const FILES_PROCESSED: &str = concatcp!(METRIC_NAME_PREFIX, "files_processed");
    pub const EVENTS_PROCESSED: &str = concatcp!(METRIC_NAME_PREFIX, "events_processed");
    pub const EVENTS_SELECTED: &str = concatcp!(METRIC_NAME_PREFIX, "events_selected");
    pub const CROSSING_TIMES_NOT_FOUND: &str =
        concatcp!(METRIC_NAME_PREFIX, "crossing_times_not_found");
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        CaptureLoadFailed,
        MalformedCapture,
        InvalidConfiguration,
        RootFindFailed,
        TimedOut,
        FeatureExtractionFailed,
        ReportWriteFailed,
        LedgerWriteFailed,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::CaptureLoadFailed => "capture_load_failed",
                FailureKind::MalformedCapture => "malformed_capture",
                FailureKind::InvalidConfiguration => "invalid_configuration",
                FailureKind::RootFindFailed => "root_find_failed",
                FailureKind::TimedOut => "timed_out",
                FailureKind::FeatureExtractionFailed => "feature_extraction_failed",
                FailureKind::ReportWriteFailed => "report_write_failed",
                FailureKind::LedgerWriteFailed => "ledger_write_failed",
            },
        )
    }
}
