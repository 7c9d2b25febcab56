// * Rolling log buffer
// * Bounded, insertion-ordered sink fed by a tracing layer; mirrored to the
// * key/value store at checkpoints (shutdown, clear)

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::constants::LOG_CAPACITY;
use crate::persistence::store::{KeyValueStore, KeyValueStoreExt, StoreError, KEY_LOG_BUFFER};

thread_local! {
    // * Set while this thread is appending from the tracing layer
    static IN_LAYER: Cell<bool> = const { Cell::new(false) };
}

/// One rendered log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// `[HH:MM:SS] message` in local time
    pub fn rendered(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.message
        )
    }
}

#[derive(Debug)]
struct Buffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

/// Cheaply cloneable handle to the shared buffer
#[derive(Debug, Clone)]
pub struct RingLog {
    inner: Arc<Mutex<Buffer>>,
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl RingLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Buffer {
                entries: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an entry, evicting the oldest when full
    pub fn push(&self, entry: LogEntry) {
        Self::push_into(&mut self.lock(), entry);
    }

    // * Append for the tracing layer. Waits for the buffer like any writer;
    // * returns false only for an event raised while this thread is already
    // * appending, which is the one way the layer could recurse.
    fn push_from_layer(&self, entry: LogEntry) -> bool {
        if IN_LAYER.with(Cell::get) {
            return false;
        }
        IN_LAYER.with(|flag| flag.set(true));
        self.push(entry);
        IN_LAYER.with(|flag| flag.set(false));
        true
    }

    fn push_into(buffer: &mut Buffer, entry: LogEntry) {
        while buffer.entries.len() >= buffer.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// The newest `n` entries, rendered, oldest first
    pub fn recent(&self, n: usize) -> Vec<String> {
        let buffer = self.lock();
        let skip = buffer.entries.len().saturating_sub(n);
        buffer.entries.iter().skip(skip).map(LogEntry::rendered).collect()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Replaces the contents, keeping only the newest entries that fit
    pub fn restore(&self, entries: Vec<LogEntry>) {
        let mut buffer = self.lock();
        buffer.entries.clear();
        let skip = entries.len().saturating_sub(buffer.capacity);
        buffer.entries.extend(entries.into_iter().skip(skip));
    }

    /// Loads the persisted buffer, if any
    pub fn load(&self, store: &dyn KeyValueStore) {
        if let Some(entries) = store.get_as::<Vec<LogEntry>>(KEY_LOG_BUFFER) {
            self.restore(entries);
        }
    }

    /// Mirrors the buffer to durable storage
    pub fn checkpoint(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        let entries = self.entries();
        store.set_as(KEY_LOG_BUFFER, &entries)
    }

    /// Returns a tracing layer feeding this buffer
    pub fn layer(&self) -> RingLogLayer {
        RingLogLayer {
            log: self.clone(),
            target_prefix: env!("CARGO_CRATE_NAME"),
        }
    }
}

/// Tracing layer that mirrors the crate's own events into a [`RingLog`]
///
/// Events from every thread are kept; only an event raised from inside an
/// append on the same thread is dropped.
#[derive(Debug, Clone)]
pub struct RingLogLayer {
    log: RingLog,
    target_prefix: &'static str,
}

impl<S: Subscriber> Layer<S> for RingLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.log.push_from_layer(LogEntry::new(visitor.finish()));
    }
}

// * Renders `message k=v k=v`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
