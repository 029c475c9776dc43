// Tracing initialization: env filter + fmt output, plus an OpenTelemetry layer
// so span context can be carried across the publish log and HTTP boundaries.
use std::collections::HashMap;
use std::sync::OnceLock;

use axum::http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::Context;
use opentelemetry_http::HeaderExtractor;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LoggingConfig, OtelConfig};

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

pub fn init_tracing(logging: &LoggingConfig, otel: &OtelConfig) {
    // Prefer RUST_LOG from env, otherwise use the configured level.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(&logging.level));

    let (provider, export_error) = build_tracer_provider(otel);
    let tracer = provider.tracer(otel.service_name.clone());
    let _ = TRACER_PROVIDER.set(provider);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init();

    match (otel.enabled, export_error) {
        (true, Some(e)) => tracing::warn!(error = %e, "OTLP exporter unavailable; spans stay local"),
        (true, None) => tracing::info!(
            endpoint = otel.endpoint.as_deref().unwrap_or(""),
            sample_ratio = ?otel.sample_ratio,
            "OTLP trace export enabled"
        ),
        (false, _) => tracing::debug!("OTLP trace export disabled"),
    }
}

/// Builds the tracer provider. Without export the provider still assigns
/// trace ids, so W3C context propagation works either way.
fn build_tracer_provider(otel: &OtelConfig) -> (SdkTracerProvider, Option<String>) {
    let sampler = match otel.sample_ratio {
        Some(r) if r >= 1.0 => Sampler::AlwaysOn,
        Some(r) if r <= 0.0 => Sampler::AlwaysOff,
        Some(r) => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(r))),
        None => Sampler::AlwaysOn,
    };
    let resource = Resource::builder()
        .with_service_name(otel.service_name.clone())
        .build();
    let builder = SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_resource(resource);

    let endpoint = otel.endpoint.as_deref().unwrap_or("");
    if !otel.enabled || endpoint.is_empty() {
        return (builder.build(), None);
    }

    match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => (builder.with_batch_exporter(exporter).build(), None),
        Err(e) => (builder.build(), Some(e.to_string())),
    }
}

/// Flushes and stops span export.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("Tracer shutdown failed: {e}");
    }
}

/// Serializes the current span's trace context as W3C headers
/// (`traceparent`, and `tracestate` when non-empty).
pub fn current_trace_headers() -> HashMap<String, String> {
    let cx = tracing::Span::current().context();
    let mut carrier = HashMap::new();
    TraceContextPropagator::new().inject_context(&cx, &mut carrier);
    carrier
}

/// Rebuilds a remote parent context from W3C headers.
pub fn context_from_headers(carrier: &HashMap<String, String>) -> Context {
    TraceContextPropagator::new().extract(carrier)
}

/// Rebuilds a remote parent context from incoming HTTP headers.
pub fn context_from_http(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_context_from_headers_reads_traceparent() {
        let carrier = HashMap::from([("traceparent".to_string(), PARENT.to_string())]);
        let cx = context_from_headers(&carrier);
        let span_context = cx.span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[test]
    fn test_context_from_http_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", PARENT.parse().unwrap());
        let cx = context_from_http(&headers);
        assert!(cx.span().span_context().is_remote());
    }

    #[test]
    fn test_inject_without_active_span_is_empty() {
        assert!(current_trace_headers().get("traceparent").is_none());
    }

    #[test]
    fn test_current_trace_headers_inside_otel_span() {
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("publish");
            let _entered = span.enter();
            let headers = current_trace_headers();
            let traceparent = headers.get("traceparent").expect("traceparent injected");
            assert!(traceparent.starts_with("00-"));
        });
    }
}
