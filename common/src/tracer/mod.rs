mod engine;

pub use engine::{TracerEngine, TracerOptions};

/// Initialises tracing for a binary, naming the OpenTelemetry service after it.
/// Any problem setting up the OpenTelemetry exporter is reported as a warning
/// through the stdout subscriber, which is always installed.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {{
        let tracer = $crate::tracer::TracerEngine::new($options, env!("CARGO_BIN_NAME"));
        // Emitted here so the warning is attributed to the calling module.
        if let Some(e) = tracer.otel_setup_error() {
            tracing::warn!("{e}");
        } else if tracer.use_otel() {
            if let Err(e) = tracer.set_otel_error_handler(|e| tracing::warn!("{e}")) {
                tracing::warn!("{e}");
            }
        }
        tracer
    }};
}
