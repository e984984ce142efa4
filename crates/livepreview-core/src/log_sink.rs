//! Unified log sink
//!
//! One append-only, ordered log shared by every producer: the sandbox
//! stream (`server`), the process-log channel (`process`), the console
//! bridge (`browser`) and locally originated messages (`terminal`).
//! Global insertion order is authoritative for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::events::{EventSink, NoOpEventSink};

/// Capacity of the live subscription channel. Slow subscribers lag, they
/// never block producers.
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Producer of a log line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    /// Generated locally by the controller
    Terminal,
    /// Forwarded from the embedded preview frame
    Browser,
    /// Sandbox process output from the companion channel
    Process,
    /// Frames from the session stream
    Server,
}

impl fmt::Display for LogOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOrigin::Terminal => write!(f, "terminal"),
            LogOrigin::Browser => write!(f, "browser"),
            LogOrigin::Process => write!(f, "process"),
            LogOrigin::Server => write!(f, "server"),
        }
    }
}

/// Severity marker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One line in the sink. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic sequence number within the sink
    pub id: u64,
    /// Microseconds since UNIX_EPOCH, non-decreasing in insertion order
    pub timestamp: u64,
    pub origin: LogOrigin,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

#[derive(Default)]
struct SinkState {
    entries: Vec<LogEntry>,
    last_timestamp: u64,
}

/// Shared handle to the unified log.
///
/// Clone-able; every clone appends to the same sequence.
#[derive(Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
    next_id: Arc<AtomicU64>,
    live: broadcast::Sender<LogEntry>,
    events: Arc<dyn EventSink>,
}

impl LogSink {
    /// Create a sink that forwards every appended entry to `events`
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        let (live, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SinkState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            live,
            events,
        }
    }

    /// Create a sink with no event forwarding
    pub fn detached() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }

    /// Append a line and return the stored entry
    pub async fn append(
        &self,
        origin: LogOrigin,
        level: LogLevel,
        message: impl Into<String>,
    ) -> LogEntry {
        let entry = {
            let mut state = self.state.lock().await;
            // Id and timestamp are assigned under the lock so both follow
            // insertion order.
            let timestamp = now_micros().max(state.last_timestamp);
            state.last_timestamp = timestamp;
            let entry = LogEntry {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                timestamp,
                origin,
                level,
                message: message.into(),
            };
            state.entries.push(entry.clone());
            // Subscribers see entries in id order. No receivers is fine.
            let _ = self.live.send(entry.clone());
            entry
        };

        if let Err(e) = self.events.emit_log(&entry).await {
            warn!("Failed to emit log entry {}: {}", entry.id, e);
        }
        entry
    }

    pub async fn info(&self, origin: LogOrigin, message: impl Into<String>) -> LogEntry {
        self.append(origin, LogLevel::Info, message).await
    }

    pub async fn warn(&self, origin: LogOrigin, message: impl Into<String>) -> LogEntry {
        self.append(origin, LogLevel::Warn, message).await
    }

    pub async fn error(&self, origin: LogOrigin, message: impl Into<String>) -> LogEntry {
        self.append(origin, LogLevel::Error, message).await
    }

    /// Snapshot of all entries in insertion order
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Entries from a single producer, still in insertion order
    pub async fn entries_from(&self, origin: LogOrigin) -> Vec<LogEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.origin == origin)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Explicit, user-visible clear. Ids keep increasing afterwards.
    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    /// Live feed of entries appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::detached()
    }
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
