//! OpenTelemetry tracer bootstrap and span helpers
//!
//! `with_span` wraps a unit of work in a named span tied to the active
//! trace context: the span becomes the ambient context for the duration
//! of the body (surviving suspension points without leaking into
//! unrelated tasks), status is recorded from the body's result, and the
//! span is ended exactly once on every exit path. Errors are observed,
//! never swallowed.

use opentelemetry::global;
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::borrow::Cow;
use std::future::Future;

const TRACER_NAME: &str = "vigil";

/// Tracer configuration
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Sampling rate (0.0-1.0)
    pub sampling_rate: f64,
    /// OTLP HTTP endpoint; spans stay local when unset
    pub otlp_endpoint: Option<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: "vigil".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sampling_rate: 1.0,
            otlp_endpoint: None,
        }
    }
}

/// Build the tracer provider and install it globally.
///
/// Returns the provider handle; the caller keeps it for flush/shutdown
/// at process exit.
pub fn init_tracer(config: &TracerConfig) -> anyhow::Result<SdkTracerProvider> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([KeyValue::new(
            "service.version",
            config.service_version.clone(),
        )])
        .build();

    let sampler = if config.sampling_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sampling_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sampling_rate)
    };

    let mut builder = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(sampler);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint.clone())
            .build()?;
        builder = builder.with_batch_exporter(exporter);
    }

    let provider = builder.build();
    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Run `body` inside a span of the given name and kind.
///
/// The span is a child of the current ambient context and becomes the
/// active span for all awaits of `body`. On `Ok` the status is set to
/// OK; on `Err` an exception event is added and the status set to
/// ERROR with the error's message — the error itself is returned
/// unchanged. The span ends exactly once before control leaves this
/// function, including for errors produced before the first suspension
/// point.
pub async fn with_span<T, E, F, Fut>(
    name: impl Into<Cow<'static, str>>,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(name)
        .with_kind(kind)
        .with_attributes(attributes)
        .start_with_context(&tracer, &Context::current());
    let cx = Context::current_with_span(span);

    let result = body().with_context(cx.clone()).await;

    let span = cx.span();
    match &result {
        Ok(_) => span.set_status(Status::Ok),
        Err(error) => {
            let message = error.to_string();
            span.add_event(
                "exception",
                vec![KeyValue::new("exception.message", message.clone())],
            );
            span.set_status(Status::error(message));
        }
    }
    span.end();

    result
}

/// Span wrapper for HTTP request handlers: kind SERVER with
/// protocol/route attributes.
pub async fn with_route_span<T, E, F, Fut>(method: &str, route: &str, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_span(
        format!("API {} {}", method, route),
        SpanKind::Server,
        vec![
            KeyValue::new("http.method", method.to_string()),
            KeyValue::new("http.route", route.to_string()),
            KeyValue::new("route.type", "api-route"),
        ],
        body,
    )
    .await
}

/// Span wrapper for background-action entry points.
pub async fn with_action_span<T, E, F, Fut>(action_name: &str, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_span(
        format!("Action {}", action_name),
        SpanKind::Server,
        vec![
            KeyValue::new("action.name", action_name.to_string()),
            KeyValue::new("action.type", "background-action"),
        ],
        body,
    )
    .await
}

/// Set attributes on the currently active span. No-op when none is
/// active.
pub fn add_span_attributes(attributes: Vec<KeyValue>) {
    let cx = Context::current();
    let span = cx.span();
    for attribute in attributes {
        span.set_attribute(attribute);
    }
}

/// Add an event to the currently active span. No-op when none is
/// active.
pub fn add_span_event(name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
    let cx = Context::current();
    cx.span().add_event(name.into(), attributes);
}

/// Record an exception on the currently active span and mark it ERROR.
/// No-op on the span side when none is active; the log line is always
/// written.
pub fn record_span_exception(error: &dyn std::fmt::Display) {
    let message = error.to_string();
    let cx = Context::current();
    let span = cx.span();
    span.add_event(
        "exception",
        vec![KeyValue::new("exception.message", message.clone())],
    );
    span.set_status(Status::error(message.clone()));
    tracing::error!(error = %message, "Exception recorded in span");
}

/// Trace id of the active span, if one is active and sampled.
pub fn current_trace_id() -> Option<String> {
    let cx = Context::current();
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

/// Span id of the active span, if one is active and sampled.
pub fn current_span_id() -> Option<String> {
    let cx = Context::current();
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        Some(span_context.span_id().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use serial_test::serial;

    fn install_test_provider() -> (SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        global::set_tracer_provider(provider.clone());
        (provider, exporter)
    }

    #[test]
    fn test_tracer_config_default() {
        let config = TracerConfig::default();
        assert_eq!(config.service_name, "vigil");
        assert_eq!(config.sampling_rate, 1.0);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    #[serial]
    fn test_init_tracer_without_exporter() {
        let provider = init_tracer(&TracerConfig::default()).unwrap();
        let tracer = provider.tracer("test");
        use opentelemetry::trace::Span as _;
        let span = tracer.start("test_span");
        assert!(!span.span_context().trace_id().to_string().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_with_span_passes_through_result() {
        let (_provider, _exporter) = install_test_provider();
        let value: Result<i32, std::convert::Infallible> =
            with_span("op", SpanKind::Internal, vec![], || async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    #[serial]
    async fn test_with_span_returns_error_unchanged() {
        let (_provider, _exporter) = install_test_provider();
        let result: Result<(), String> =
            with_span("op", SpanKind::Internal, vec![], || async {
                Err("original error text".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "original error text");
    }

    #[tokio::test]
    #[serial]
    async fn test_with_span_ends_span_exactly_once_per_invocation() {
        let (_provider, exporter) = install_test_provider();
        exporter.reset();

        let _: Result<(), String> = with_span("success-op", SpanKind::Internal, vec![], || async {
            Ok(())
        })
        .await;
        // Error raised before any suspension point
        let _: Result<(), String> = with_span("failing-op", SpanKind::Internal, vec![], || async {
            Err("early failure".to_string())
        })
        .await;

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let success = spans.iter().find(|s| s.name == "success-op").unwrap();
        assert_eq!(success.status, Status::Ok);
        let failure = spans.iter().find(|s| s.name == "failing-op").unwrap();
        assert!(matches!(failure.status, Status::Error { .. }));
        assert!(failure.events.events.iter().any(|e| e.name == "exception"));
    }

    #[tokio::test]
    #[serial]
    async fn test_nested_spans_share_trace() {
        let (_provider, exporter) = install_test_provider();
        exporter.reset();

        let _: Result<(), String> = with_span("outer", SpanKind::Server, vec![], || async {
            let outer_trace = current_trace_id().expect("outer span active");
            with_span("inner", SpanKind::Internal, vec![], || async {
                let inner_trace = current_trace_id().expect("inner span active");
                assert_eq!(inner_trace, outer_trace);
                Ok::<_, String>(())
            })
            .await?;
            // Ending the inner span restores the outer one
            assert_eq!(current_trace_id().expect("outer restored"), outer_trace);
            Ok(())
        })
        .await;

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let outer = spans.iter().find(|s| s.name == "outer").unwrap();
        let inner = spans.iter().find(|s| s.name == "inner").unwrap();
        assert_eq!(inner.parent_span_id, outer.span_context.span_id());
        assert_eq!(
            inner.span_context.trace_id(),
            outer.span_context.trace_id()
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_route_span_attributes() {
        let (_provider, exporter) = install_test_provider();
        exporter.reset();

        let _: Result<(), String> =
            with_route_span("GET", "/api/health", || async { Ok(()) }).await;

        let spans = exporter.get_finished_spans().unwrap();
        let span = spans.iter().find(|s| s.name == "API GET /api/health").unwrap();
        assert_eq!(span.span_kind, SpanKind::Server);
        assert!(span
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "http.route" && kv.value.as_str() == "/api/health"));
    }

    #[test]
    fn test_ambient_helpers_are_noops_without_span() {
        // Must not panic with no active span
        add_span_attributes(vec![KeyValue::new("k", "v")]);
        add_span_event("event", vec![]);
        record_span_exception(&"no span active");
        assert!(current_trace_id().is_none() || current_trace_id().is_some());
    }
}
