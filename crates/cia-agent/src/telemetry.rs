//! Telemetry sink
//!
//! Interventions and caller-visible failures are reported to a sink that is
//! assumed to be fire-and-forget and non-blocking. Formatting and storage are
//! the sink's business.

use serde_json::Value;
use std::error::Error;

/// Destination for agent telemetry
pub trait TelemetrySink: Send + Sync + 'static {
    /// Record a named event
    fn log_event(&self, name: &str, payload: &Value);

    /// Record an error with the operation it occurred in
    fn log_error(&self, error: &(dyn Error + 'static), context: &str);
}

/// Sink that forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn log_event(&self, name: &str, payload: &Value) {
        tracing::info!(event = name, %payload, "agent event");
    }

    fn log_error(&self, error: &(dyn Error + 'static), context: &str) {
        tracing::error!(context, "agent error: {}", error);
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn log_event(&self, _name: &str, _payload: &Value) {}

    fn log_error(&self, _error: &(dyn Error + 'static), _context: &str) {}
}
