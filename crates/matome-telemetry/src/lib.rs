//! OpenTelemetry export for matome.
//!
//! The server always logs through `tracing`. With the `telemetry` feature
//! built in, spans are also exported over OTLP when the standard OTel
//! environment variables ask for it:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 cargo run -p matome-server
//!
//! OTEL_SERVICE_NAME=matome \
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://jaeger:4317 \
//! cargo run -p matome-server
//! ```
//!
//! `OTEL_SDK_DISABLED=true` turns export off even when an endpoint is set.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, TelemetryError, otel_layer};

/// Whether OTel export was requested through the process environment.
pub fn otel_enabled() -> bool {
    otel_enabled_from(|name| std::env::var(name).ok())
}

/// [`otel_enabled`] against an arbitrary variable lookup.
///
/// Export is on when `OTEL_SDK_DISABLED` is not `"true"` and either
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set or `OTEL_TRACES_EXPORTER` names
/// something other than `"none"`.
pub fn otel_enabled_from(lookup: impl Fn(&str) -> Option<String>) -> bool {
    if lookup("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }

    if lookup("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        return true;
    }

    lookup("OTEL_TRACES_EXPORTER").is_some_and(|exporter| !exporter.eq_ignore_ascii_case("none"))
}
