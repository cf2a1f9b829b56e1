//! In-memory log capture for the admin API.
//!
//! [`LogCaptureLayer`] is a `tracing_subscriber` layer that copies every
//! event into a [`LogBuffer`]. The buffer keeps the most recent entries for
//! `GET /admin/logs` and fans new entries out to `GET /admin/logs/stream`.
//!
//! ## Entry format
//!
//! ```json
//! { "level": "info", "message": "Safety state changed", "timestamp": "...",
//!   "namespace": "safetymonitor_server::router", "fields": { "is_safe": false } }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Largest number of entries `GET /admin/logs` returns.
pub const MAX_LOG_QUERY: usize = 1000;

/// Entries returned by `GET /admin/logs` without `n`.
pub const DEFAULT_LOG_QUERY: usize = 200;

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// "trace", "debug", "info", "warn" or "error".
    pub level: String,

    pub message: String,

    /// RFC 3339 timestamp.
    pub timestamp: String,

    /// Event target, usually the module path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Structured fields other than the message.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub fields: Map<String, Value>,
}

impl LogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            namespace: None,
            fields: Map::new(),
        }
    }
}

/// Bounded ring of recent log entries plus a live feed.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    live: broadcast::Sender<LogEntry>,
}

impl LogBuffer {
    /// Create a buffer keeping at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                capacity,
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
                live,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&self, entry: LogEntry) {
        {
            let mut entries = self.lock();
            if entries.len() == self.inner.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        let _ = self.inner.live.send(entry);
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Receive entries pushed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.live.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        // A panic while holding the lock leaves the ring intact.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Clamp the `n` query parameter of `GET /admin/logs`.
pub fn clamp_log_query(n: Option<&str>) -> usize {
    match n.map(str::trim) {
        None | Some("") => DEFAULT_LOG_QUERY,
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => v.clamp(0.0, MAX_LOG_QUERY as f64) as usize,
            _ => DEFAULT_LOG_QUERY,
        },
    }
}

/// `tracing` layer feeding a [`LogBuffer`].
pub struct LogCaptureLayer {
    buffer: LogBuffer,
}

impl LogCaptureLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            level: metadata.level().as_str().to_ascii_lowercase(),
            message: visitor.message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            namespace: Some(metadata.target().to_string()),
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }
}
