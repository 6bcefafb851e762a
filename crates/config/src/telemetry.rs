//! Telemetry configuration for observability.

use std::{collections::BTreeMap, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::llm::duration_secs;

/// Telemetry configuration for observability.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name for telemetry identification.
    service_name: Option<String>,

    /// Custom resource attributes to attach to all telemetry.
    resource_attributes: BTreeMap<String, String>,

    /// Global exporters configuration.
    exporters: ExportersConfig,

    /// Tracing-specific exporter overrides.
    tracing: SignalConfig,

    /// Metrics-specific exporter overrides.
    metrics: SignalConfig,
}

/// Exporters configuration for one telemetry signal.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct SignalConfig {
    exporters: Option<ExportersConfig>,
}

/// Exporters configuration for telemetry.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OTLP exporter configuration.
    pub otlp: OtlpExporterConfig,
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether this exporter is enabled.
    pub enabled: bool,
    /// OTLP endpoint URL.
    pub endpoint: Url,
    /// OTLP protocol selection.
    pub protocol: OtlpProtocol,
    /// Request timeout, in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub timeout: Duration,
    /// Delay between batch exports, in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub scheduled_delay: Duration,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: Url::parse("http://localhost:4317").expect("default URL should be valid"),
            protocol: OtlpProtocol::default(),
            timeout: Duration::from_secs(60),
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

/// OTLP protocol selection.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC protocol (default).
    #[default]
    Grpc,
    /// HTTP/protobuf protocol.
    Http,
}

impl TelemetryConfig {
    /// Get the service name.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Get the resource attributes.
    pub fn resource_attributes(&self) -> &BTreeMap<String, String> {
        &self.resource_attributes
    }

    /// Check if tracing is effectively enabled (has an enabled exporter).
    pub fn tracing_enabled(&self) -> bool {
        self.traces_otlp_config().is_some()
    }

    /// Effective OTLP configuration for metrics: the metrics-specific
    /// exporter if enabled, otherwise the global one.
    pub fn metrics_otlp_config(&self) -> Option<&OtlpExporterConfig> {
        effective_otlp(&self.metrics, &self.exporters)
    }

    /// Effective OTLP configuration for traces.
    pub fn traces_otlp_config(&self) -> Option<&OtlpExporterConfig> {
        effective_otlp(&self.tracing, &self.exporters)
    }
}

fn effective_otlp<'a>(signal: &'a SignalConfig, global: &'a ExportersConfig) -> Option<&'a OtlpExporterConfig> {
    if let Some(exporters) = signal.exporters.as_ref()
        && exporters.otlp.enabled
    {
        return Some(&exporters.otlp);
    }

    global.otlp.enabled.then_some(&global.otlp)
}
