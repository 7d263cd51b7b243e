use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: env filter, flattened JSON logs with
/// source locations, and an OTLP span exporter when `otlp_endpoint` is set.
///
/// A broken exporter is reported on stderr and the service keeps logging.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let spans = otlp_endpoint.and_then(|endpoint| span_export_layer(service_name, endpoint));
    let json_logs = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(spans)
        .with(json_logs)
        .init();
}

fn span_export_layer<S>(service_name: &str, endpoint: &str) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]);
    let installed = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio);

    match installed {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed()),
        Err(e) => {
            eprintln!("OTLP export to '{}' disabled for '{}': {}", endpoint, service_name, e);
            None
        }
    }
}
