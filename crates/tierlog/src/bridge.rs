//! Forward `tracing` events into a [`Logger`]

use crate::{
    encoding::{Caller, Field},
    level::Level,
    logger::Logger,
};
use serde_json::{json, Value};
use std::fmt;
use tracing::{field::Visit, Event, Subscriber};
use tracing_subscriber::{layer::Context, Layer};

/// Layer routing `tracing` events through a logger's per-level files.
///
/// `TRACE` and `DEBUG` map to [`Level::Debug`]. Events emitted by this crate
/// are dropped so rotation and retention diagnostics never loop back into
/// the sinks that produced them.
pub struct TierlogLayer {
    logger: Logger,
}

impl TierlogLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

fn is_internal(target: &str) -> bool {
    target == "tierlog" || target.starts_with("tierlog::")
}

impl<S> Layer<S> for TierlogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }

        let level = Level::from(*metadata.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let caller = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(Caller::new(file, line)),
            _ => None,
        };
        let message = visitor.message.unwrap_or_default();

        if let Err(e) = self
            .logger
            .log_at(level, caller, &message, &visitor.fields)
        {
            // tracing is the source here; reporting through it would recurse
            eprintln!("tierlog: failed to write {} entry: {}", level, e);
        }
    }
}

/// Collects event fields in recording order
#[derive(Default)]
struct FieldVisitor {
    fields: Vec<Field>,
    message: Option<String>,
}

impl FieldVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: Value) {
        self.fields.push(Field::new(field.name(), value));
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.push(field, json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field, json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field, json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push(field, json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, json!(value));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.push(field, json!(format!("{:?}", value)));
        }
    }
}
