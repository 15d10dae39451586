//! OTLP tracing layer and sampler.

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, ShouldSample, SpanLimits};
use tracing_opentelemetry::OpenTelemetryLayer;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),
}

/// Shuts the tracer provider down on drop, flushing buffered spans.
///
/// Hold it for the life of the process.
pub struct OtelGuard {
    provider: SdkTracerProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("OTel shutdown error: {e}");
        }
    }
}

/// Build an OTLP-exporting tracing layer for `tracing_subscriber::registry()`.
///
/// Must be called inside a Tokio runtime; the batch exporter spawns onto it.
pub fn otel_layer<S>(
    service_name: &str,
) -> Result<(OpenTelemetryLayer<S, SdkTracer>, OtelGuard), TelemetryError>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(MatomeSampler)
        .with_resource(resource)
        .with_span_limits(SpanLimits::default())
        .build();

    global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer("matome");
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);

    Ok((layer, OtelGuard { provider }))
}

/// Sampling rate for a root span, chosen by its name prefix.
///
/// | Prefix      | Rate | Spans                                  |
/// |-------------|------|----------------------------------------|
/// | `llm.*`     | 100% | model calls                            |
/// | `session.*` | 100% | Session Loop runs and their generations |
/// | `submit`    | 10%  | per-message admission                  |
/// | other       | 10%  |                                        |
fn sampling_rate(name: &str) -> f64 {
    if name.starts_with("llm") || name.starts_with("session") {
        1.0
    } else {
        0.1
    }
}

fn is_error(attributes: &[KeyValue]) -> bool {
    attributes.iter().any(|kv| {
        (kv.key.as_str() == "otel.status_code" && kv.value.as_str() == "ERROR")
            || (kv.key.as_str() == "error" && kv.value.as_str() == "true")
    })
}

/// Samples by span category. Errors and children of sampled spans are
/// always kept.
#[derive(Debug, Clone)]
struct MatomeSampler;

impl ShouldSample for MatomeSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if let Some(cx) = parent_context {
            let parent = cx.span();
            let parent_ctx = parent.span_context();
            if parent_ctx.is_sampled() {
                return SamplingResult {
                    decision: SamplingDecision::RecordAndSample,
                    attributes: vec![],
                    trace_state: parent_ctx.trace_state().clone(),
                };
            }
        }

        if is_error(attributes) {
            return SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: vec![],
                trace_state: TraceState::default(),
            };
        }

        Sampler::TraceIdRatioBased(sampling_rate(name)).should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, attributes: &[KeyValue]) -> SamplingDecision {
        MatomeSampler
            .should_sample(
                None,
                TraceId::from_bytes([0xff; 16]),
                name,
                &SpanKind::Internal,
                attributes,
                &[],
            )
            .decision
    }

    #[test]
    fn test_rates_by_prefix() {
        assert_eq!(sampling_rate("llm.generate"), 1.0);
        assert_eq!(sampling_rate("session.run"), 1.0);
        assert_eq!(sampling_rate("session.generate"), 1.0);
        assert_eq!(sampling_rate("submit"), 0.1);
        assert_eq!(sampling_rate("console.line"), 0.1);
    }

    #[test]
    fn test_errors_always_sampled() {
        let attrs = [KeyValue::new("error", "true")];
        assert_eq!(sample("submit", &attrs), SamplingDecision::RecordAndSample);
    }

    #[test]
    fn test_session_spans_always_sampled() {
        assert_eq!(sample("session.run", &[]), SamplingDecision::RecordAndSample);
    }

    #[test]
    fn test_high_trace_id_dropped_at_low_rate() {
        // Ratio sampling keeps trace ids below rate * 2^63
        assert_eq!(sample("submit", &[]), SamplingDecision::Drop);
    }
}
