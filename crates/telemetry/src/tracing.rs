//! Distributed tracing implementation using fastrace with OpenTelemetry export

use std::borrow::Cow;

use anyhow::Context;
use config::TelemetryConfig;
use fastrace::Span;
use fastrace::collector::Config as CollectorConfig;
use fastrace::prelude::SpanContext;
use fastrace_opentelemetry::OpenTelemetryReporter;
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;

/// Guard that ensures proper cleanup of tracing resources
pub struct TracingGuard;

impl TracingGuard {
    /// Force flush all pending traces immediately.
    /// Useful for tests to ensure traces are exported before assertions.
    pub fn force_flush(&self) -> anyhow::Result<()> {
        fastrace::flush();
        Ok(())
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        fastrace::flush();
    }
}

/// Initialize distributed tracing with fastrace and OpenTelemetry export
pub fn init_tracing(config: &TelemetryConfig) -> anyhow::Result<TracingGuard> {
    let Some(otlp_config) = config.traces_otlp_config() else {
        log::debug!("No OTLP exporter configured for traces");
        return Ok(TracingGuard);
    };

    log::debug!("Initializing tracing with OTLP export to {}", otlp_config.endpoint);

    let service_name = config.service_name().unwrap_or("switchboard").to_string();
    let mut resource_attributes = vec![KeyValue::new("service.name", service_name)];

    for (key, value) in config.resource_attributes() {
        resource_attributes.push(KeyValue::new(key.clone(), value.clone()));
    }

    let resource = Resource::builder_empty().with_attributes(resource_attributes).build();

    let exporter = match otlp_config.protocol {
        config::OtlpProtocol::Grpc => {
            use opentelemetry_otlp::WithTonicConfig;

            SpanExporter::builder()
                .with_tonic()
                .with_endpoint(otlp_config.endpoint.to_string())
                .with_timeout(otlp_config.timeout)
                .build()
                .context("Failed to build gRPC OTLP span exporter")?
        }
        config::OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(otlp_config.endpoint.to_string())
            .with_timeout(otlp_config.timeout)
            .build()
            .context("Failed to build HTTP OTLP span exporter")?,
    };

    let instrumentation_scope = InstrumentationScope::builder("switchboard")
        .with_version(env!("CARGO_PKG_VERSION"))
        .build();

    let otel_reporter = OpenTelemetryReporter::new(exporter, Cow::Owned(resource), instrumentation_scope);
    let collector_config = CollectorConfig::default().report_interval(otlp_config.scheduled_delay);

    fastrace::set_reporter(otel_reporter, collector_config);

    log::debug!(
        "Tracing subsystem initialized successfully with service name: {}",
        config.service_name().unwrap_or("switchboard")
    );

    Ok(TracingGuard)
}

/// Creates a child span if the parent is sampled, otherwise returns a no-op span.
///
/// # Behavior
/// - If there's an active local parent (direct call), creates a child span
/// - If there's a trace context provided (async task), creates a root span in the same trace
/// - Otherwise returns a no-op span that won't be exported
pub fn create_child_span(name: &'static str, trace_context: Option<SpanContext>) -> Span {
    if SpanContext::current_local_parent().is_some() {
        Span::enter_with_local_parent(name)
    } else if let Some(context) = trace_context {
        Span::root(name, context)
    } else {
        Span::noop()
    }
}
