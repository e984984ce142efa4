//! Event Sink Trait
//!
//! This module provides the EventSink trait for decoupling event emission
//! from any particular frontend. Implementations can forward to a GUI,
//! write to stdout (CLI), or record for tests.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::log_sink::LogEntry;
use crate::readiness::StatusCaption;
use crate::session::Phase;

/// A session phase change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseChange {
    pub session_id: String,
    pub from: Phase,
    pub to: Phase,
    /// Preview URL once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// How loudly a notification should be shown
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Error,
}

/// A user-visible notification. Only failures that stop the user from
/// proceeding are raised this way; everything else stays in the log sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub severity: NotificationSeverity,
    pub title: String,
    pub detail: String,
}

impl Notification {
    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: NotificationSeverity::Error,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: NotificationSeverity::Info,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// Event sink for emitting events to listeners
///
/// Object-safe so the controller and log sink can share one
/// `Arc<dyn EventSink>`.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// A line was appended to the unified log
    async fn emit_log(&self, entry: &LogEntry) -> Result<(), String>;

    /// The session moved to a new phase
    async fn emit_phase_changed(&self, change: &PhaseChange) -> Result<(), String>;

    /// The human-readable status caption changed
    async fn emit_caption(&self, session_id: &str, caption: &StatusCaption)
        -> Result<(), String>;

    /// A blocking, user-visible notification
    async fn emit_notification(&self, notification: &Notification) -> Result<(), String>;
}

/// No-op event sink for testing or headless embedding
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit_log(&self, _entry: &LogEntry) -> Result<(), String> {
        Ok(())
    }

    async fn emit_phase_changed(&self, _change: &PhaseChange) -> Result<(), String> {
        Ok(())
    }

    async fn emit_caption(
        &self,
        _session_id: &str,
        _caption: &StatusCaption,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn emit_notification(&self, _notification: &Notification) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout event sink for CLI mode - prints events to console
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit_log(&self, entry: &LogEntry) -> Result<(), String> {
        if self.json_output {
            let line = serde_json::to_string(entry).map_err(|e| e.to_string())?;
            println!(r#"{{"event":"log","payload":{line}}}"#);
        } else {
            let marker = match entry.level {
                crate::log_sink::LogLevel::Info => " ",
                crate::log_sink::LogLevel::Warn => "!",
                crate::log_sink::LogLevel::Error => "✗",
            };
            println!(
                "[{}] {} {:<8} {}",
                format_timestamp(entry.timestamp),
                marker,
                entry.origin,
                entry.message
            );
        }
        Ok(())
    }

    async fn emit_phase_changed(&self, change: &PhaseChange) -> Result<(), String> {
        if self.json_output {
            let payload = serde_json::to_string(change).map_err(|e| e.to_string())?;
            println!(r#"{{"event":"phase_changed","payload":{payload}}}"#);
        } else {
            match &change.url {
                Some(url) => println!("Phase: {} -> {} ({url})", change.from, change.to),
                None => println!("Phase: {} -> {}", change.from, change.to),
            }
        }
        Ok(())
    }

    async fn emit_caption(
        &self,
        session_id: &str,
        caption: &StatusCaption,
    ) -> Result<(), String> {
        if self.json_output {
            let payload = serde_json::json!({
                "session_id": session_id,
                "caption": caption.to_string(),
            });
            println!(r#"{{"event":"caption","payload":{payload}}}"#);
        } else {
            println!("Status: {caption}");
        }
        Ok(())
    }

    async fn emit_notification(&self, notification: &Notification) -> Result<(), String> {
        if self.json_output {
            let payload = serde_json::to_string(notification).map_err(|e| e.to_string())?;
            println!(r#"{{"event":"notification","payload":{payload}}}"#);
        } else {
            eprintln!("{}: {}", notification.title, notification.detail);
        }
        Ok(())
    }
}

/// Render a microsecond timestamp as local wall-clock time
fn format_timestamp(micros: u64) -> String {
    match DateTime::<Utc>::from_timestamp_micros(micros as i64) {
        Some(utc) => utc.with_timezone(&Local).format("%H:%M:%S%.3f").to_string(),
        None => "--:--:--.---".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::{LogLevel, LogOrigin};

    fn entry() -> LogEntry {
        LogEntry {
            id: 1,
            timestamp: 1_700_000_000_000_000,
            origin: LogOrigin::Server,
            level: LogLevel::Info,
            message: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        assert!(sink.emit_log(&entry()).await.is_ok());
        assert!(sink
            .emit_notification(&Notification::error("Preview failed", "boom"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_stdout_sink_json() {
        let sink = StdoutEventSink::new(true);
        let change = PhaseChange {
            session_id: "s1".to_string(),
            from: Phase::Booting,
            to: Phase::Building,
            url: Some("http://localhost:3000".to_string()),
        };
        assert!(sink.emit_phase_changed(&change).await.is_ok());
        assert!(sink.emit_log(&entry()).await.is_ok());
    }

    #[test]
    fn test_format_timestamp_shape() {
        let formatted = format_timestamp(1_700_000_000_123_000);
        assert_eq!(formatted.len(), "00:00:00.000".len());
        assert!(formatted.ends_with(".123"));
    }

    #[test]
    fn test_phase_change_skips_missing_url() {
        let change = PhaseChange {
            session_id: "s1".to_string(),
            from: Phase::Idle,
            to: Phase::Booting,
            url: None,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(!json.contains("url"));
        assert!(json.contains("\"to\":\"booting\""));
    }
}
