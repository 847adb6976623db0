//! Structured logging and distributed tracing initialization (spec §4.5
//! "initializes the tracer"; SPEC_FULL §2 "Structured logging & tracing").
//!
//! Supersedes the teacher's `log`/`env_logger` pair (`src/logs/logger.rs`),
//! which cannot carry the per-request structured fields §4.2's logger
//! enrichment middleware attaches. `tracing` + `tracing-subscriber`'s JSON
//! formatter emit the structured log lines; `tracing-opentelemetry` bridges
//! spans to an OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Config as TraceConfig;
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::RuntimeError;

/// Holds the tracer provider so the lifecycle's shutdown sequence can flush
/// it within its 3-second budget (spec §4.5 "flush the tracer").
pub struct TracerGuard {
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TracerGuard {
    pub fn flush(&self) {
        if let Some(provider) = &self.provider {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to flush a tracer span processor");
                }
            }
        }
    }

    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "failed to shut down tracer provider");
            }
        }
    }
}

/// Initializes the global `tracing` subscriber: JSON-formatted structured
/// logs on stdout, plus an OTLP span exporter when `otlp_endpoint` is set.
/// Idempotent to call is NOT guaranteed — call exactly once, at startup,
/// per the teacher's single `env_logger::Builder::init()` call site.
pub fn init_tracing(service_name: &str, otlp_endpoint: Option<&str>) -> Result<TracerGuard, RuntimeError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let provider = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint);
            let provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(
                    TraceConfig::default()
                        .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name.to_string())])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .map_err(|e| RuntimeError::internal(format!("failed to install OTLP tracer: {e}")))?;

            let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));
            Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()
                .map_err(|e| RuntimeError::internal(format!("failed to install tracing subscriber: {e}")))?;
            Some(provider)
        }
        None => {
            Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| RuntimeError::internal(format!("failed to install tracing subscriber: {e}")))?;
            None
        }
    };

    Ok(TracerGuard { provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_otlp_endpoint_does_not_require_a_collector() {
        // A bare fmt subscriber must be constructible without reaching the
        // network; this only checks the no-OTLP branch compiles and runs
        // when no global subscriber has been installed by another test.
        let _ = std::panic::catch_unwind(|| {
            let _ = init_tracing("test-service", None);
        });
    }
}
