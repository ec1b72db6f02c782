//! Tracing setup and the diagnostics layer.
//!
//! [`init_tracing`] installs the global subscriber: an `EnvFilter` (the
//! `RUST_LOG` variable wins over the configured filter), a console formatter
//! (pretty or JSON), an optional daily-rotated log file, and an optional
//! [`DiagnosticsLayer`] that forwards events to a channel so a host can show
//! them in an output panel.

use anyhow::Context as _;
use chrono::Utc;
use nexus_core::config::LoggingConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_PREFIX: &str = "nexus.log";

/// One tracing event, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    /// Event target (e.g., "nexus::agent_stderr")
    pub target: String,
    pub level: String,
    pub message: String,
    pub fields: HashMap<String, Value>,
    /// Fields recorded on the enclosing spans, innermost last.
    pub span: HashMap<String, Value>,
    pub timestamp: String,
}

/// Forwards every event it sees to an unbounded channel.
pub struct DiagnosticsLayer {
    sender: mpsc::UnboundedSender<DiagnosticEvent>,
}

impl DiagnosticsLayer {
    pub fn new(sender: mpsc::UnboundedSender<DiagnosticEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

/// Span fields, stored in the span's extensions.
struct SpanFields(HashMap<String, Value>);

impl<S> Layer<S> for DiagnosticsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(stored) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(stored.0.clone());
                }
            }
        }

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let diagnostic = DiagnosticEvent {
            target: event.metadata().target().to_string(),
            level: event.metadata().level().to_string(),
            message,
            fields,
            span: span_fields,
            timestamp: Utc::now().to_rfc3339(),
        };

        // A closed receiver just means nobody is watching.
        let _ = self.sender.send(diagnostic);
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(format!("{:?}", value)),
        );
    }
}

/// Installs the global subscriber.
///
/// # Arguments
///
/// * `config` - Filter and output format
/// * `logs_dir` - Directory for the rotated log file, used when `config.file` is set
/// * `diagnostics` - Optional layer forwarding events to the host
///
/// # Returns
///
/// The file writer's guard when file logging is on. Keep it alive for the
/// lifetime of the process so buffered lines are flushed.
///
/// # Errors
///
/// Fails when the filter does not parse, the log directory cannot be created,
/// or a global subscriber is already installed.
pub fn init_tracing(
    config: &LoggingConfig,
    logs_dir: Option<&Path>,
    diagnostics: Option<DiagnosticsLayer>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .with_context(|| format!("invalid log filter '{}'", config.filter))?,
    };

    let pretty = (!config.json).then(|| fmt::layer().with_target(true));
    let json = config.json.then(|| fmt::layer().json().with_current_span(true));

    let (file, guard) = match (config.file, logs_dir) {
        (true, Some(dir)) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(file)
        .with(diagnostics)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_diagnostics_layer_captures_fields_and_span() {
        let (layer, mut receiver) = DiagnosticsLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("turn", session = "session-1");
            let _entered = span.enter();
            tracing::warn!(chars = 12u64, "[Session] turn ended");
        });

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.level, "WARN");
        assert_eq!(event.message, "[Session] turn ended");
        assert_eq!(event.fields["chars"], serde_json::json!(12));
        assert_eq!(event.span["session"], serde_json::json!("session-1"));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (layer, receiver) = DiagnosticsLayer::channel();
        drop(receiver);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("nobody listening");
        });
    }
}
