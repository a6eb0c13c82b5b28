//! Application logger.
//!
//! Provides:
//! - Severity [`Level`]s and the [`LogRecord`] type
//! - [`Logger`]: level-gated structured logging front-end
//! - [`BatchLogSink`]: in-memory batching with size and timer flushes

pub mod level;
pub mod sink;

pub use level::Level;
pub use sink::{BatchLogSink, FlushTrigger, LogWriter, SinkConfig};

use serde_json::{Map, Value};
use std::sync::Arc;

/// Structured attributes attached to a record.
pub type Attrs = Map<String, Value>;

/// One log entry waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub level: Level,
    pub message: String,
    pub data: Attrs,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>, data: Attrs) -> Self {
        Self {
            id: crate::generate_id(),
            timestamp: crate::now_millis(),
            level,
            message: message.into(),
            data,
        }
    }
}

/// Level-gated structured logger writing into a [`BatchLogSink`].
///
/// Cloning is cheap; clones share the sink.
#[derive(Clone)]
pub struct Logger {
    sink: BatchLogSink,
    attrs: Arc<Attrs>,
}

impl Logger {
    pub fn new(sink: BatchLogSink) -> Self {
        Self {
            sink,
            attrs: Arc::new(Attrs::new()),
        }
    }

    pub fn sink(&self) -> &BatchLogSink {
        &self.sink
    }

    /// Whether records at `level` are currently let through.
    pub fn enabled(&self, level: Level) -> bool {
        self.sink.enabled(level)
    }

    pub fn set_level(&self, level: Level) {
        self.sink.set_level(level);
    }

    /// A child logger that adds `attrs` to every record.
    pub fn with(&self, attrs: Attrs) -> Self {
        let mut merged = (*self.attrs).clone();
        merged.extend(attrs);
        Self {
            sink: self.sink.clone(),
            attrs: Arc::new(merged),
        }
    }

    /// Log a message with structured data.
    pub fn log(&self, level: Level, message: impl Into<String>, data: Attrs) {
        if !self.enabled(level) {
            return;
        }

        let mut merged = (*self.attrs).clone();
        merged.extend(data);
        let record = LogRecord::new(level, message, merged);

        if self.sink.config().dev {
            mirror_to_tracing(&record);
        }

        self.sink.push(record);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::DEBUG, message, Attrs::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::INFO, message, Attrs::new());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::WARN, message, Attrs::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::ERROR, message, Attrs::new());
    }
}

fn mirror_to_tracing(record: &LogRecord) {
    let data = Value::Object(record.data.clone());
    let severity = record.level;
    let message = record.message.as_str();
    match record.level.as_i32() {
        i32::MIN..=-5 => tracing::trace!(target: "app", %severity, %data, "{message}"),
        -4..=-1 => tracing::debug!(target: "app", %severity, %data, "{message}"),
        0..=3 => tracing::info!(target: "app", %severity, %data, "{message}"),
        4..=7 => tracing::warn!(target: "app", %severity, %data, "{message}"),
        _ => tracing::error!(target: "app", %severity, %data, "{message}"),
    }
}
