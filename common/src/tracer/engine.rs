use opentelemetry::{KeyValue, global::Error, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, propagation::TraceContextPropagator, runtime, trace::Config};
use tracing::{Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan};

/// Where, besides stdout, spans should be exported.
pub struct TracerOptions<'a> {
    collector: Option<Collector<'a>>,
}

struct Collector<'a> {
    endpoint: &'a str,
    namespace: String,
}

impl<'a> TracerOptions<'a> {
    /// # Arguments
    /// * `endpoint` - URL of an OpenTelemetry collector, or None to trace to stdout only.
    /// * `namespace` - attached to every exported span as "service.namespace", so that
    ///   several monitors watching different directories can be told apart.
    pub fn new(endpoint: Option<&'a str>, namespace: String) -> Self {
        Self {
            collector: endpoint.map(|endpoint| Collector {
                endpoint,
                namespace,
            }),
        }
    }
}

/// Owns the global tracing subscriber for the lifetime of the binary.
/// Dropping it flushes any spans still queued for the collector.
pub struct TracerEngine {
    use_otel: bool,
    otel_setup_error: Option<String>,
}

impl TracerEngine {
    /// Installs the stdout subscriber (filtered by `RUST_LOG`) and, when a collector is
    /// configured, an OpenTelemetry layer (filtered by `OTEL_LEVEL`, off by default).
    ///
    /// Must be called from within a tokio runtime when a collector is configured, as the
    /// batch exporter is driven by it.
    pub fn new(options: TracerOptions, service_name: &str) -> Self {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(EnvFilter::from_default_env());

        let mut otel_setup_error = None;
        let otel_layer = options.collector.and_then(|collector| {
            collector_layer(collector, service_name)
                .map_err(|e| otel_setup_error = Some(format!("OpenTelemetry disabled: {e}")))
                .ok()
        });
        let use_otel = otel_layer.is_some();

        let subscriber = tracing_subscriber::Registry::default()
            .with(stdout_layer)
            .with(otel_layer);

        //  This is only called once, so will never panic
        #[allow(clippy::expect_used)]
        tracing::subscriber::set_global_default(subscriber)
            .expect("tracing::subscriber::set_global_default should only be called once");

        Self {
            use_otel,
            otel_setup_error,
        }
    }

    pub fn use_otel(&self) -> bool {
        self.use_otel
    }

    pub fn otel_setup_error(&self) -> Option<&str> {
        self.otel_setup_error.as_deref()
    }

    pub fn set_otel_error_handler<F>(&self, f: F) -> Result<(), Error>
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        opentelemetry::global::set_error_handler(f)
    }
}

impl Drop for TracerEngine {
    fn drop(&mut self) {
        if self.use_otel {
            opentelemetry::global::shutdown_tracer_provider()
        }
    }
}

fn collector_layer<S>(
    collector: Collector,
    service_name: &str,
) -> Result<impl Layer<S> + use<S>, TraceError>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_owned()),
        KeyValue::new("service.namespace", collector.namespace),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(Config::default().with_resource(resource))
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(collector.endpoint),
        )
        .install_batch(runtime::Tokio)?;

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .with_env_var("OTEL_LEVEL")
        .from_env_lossy();

    Ok(tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(filter))
}
