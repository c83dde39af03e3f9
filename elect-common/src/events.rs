//! Event types for the loader event system
//!
//! Provides the import event vocabulary and the EventBus used to fan events
//! out to the HTTP log stream and any other listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity of an operator-visible log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSeverity::Info => write!(f, "INFO"),
            LogSeverity::Warn => write!(f, "WARN"),
            LogSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// How an attachment download ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Import event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// Import run started
    SessionStarted {
        session_id: Uuid,
        /// Source label (file path or page URL)
        source: String,
        /// Result provider name
        provider: String,
        timestamp: DateTime<Utc>,
    },

    /// One line of the operator log stream
    Log {
        /// None for lines not tied to a run (e.g. image prefetch)
        session_id: Option<Uuid>,
        severity: LogSeverity,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Attachment transfer started
    DownloadStarted {
        session_id: Option<Uuid>,
        uri: String,
    },

    /// Attachment transfer progress
    DownloadProgress {
        session_id: Option<Uuid>,
        uri: String,
        received: u64,
        /// None when the server did not announce a length
        total: Option<u64>,
    },

    /// Attachment transfer finished
    DownloadFinished {
        session_id: Option<Uuid>,
        uri: String,
        outcome: DownloadOutcome,
    },

    /// Import run completed
    SessionCompleted {
        session_id: Uuid,
        total: usize,
        created: usize,
        updated: usize,
        skipped: usize,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    /// Import run aborted by a run-fatal error
    SessionFailed {
        session_id: Uuid,
        error_message: String,
        records_processed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Import run cancelled by the operator
    SessionCancelled {
        session_id: Uuid,
        records_processed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ImportEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ImportEvent::SessionStarted { .. } => "SessionStarted",
            ImportEvent::Log { .. } => "Log",
            ImportEvent::DownloadStarted { .. } => "DownloadStarted",
            ImportEvent::DownloadProgress { .. } => "DownloadProgress",
            ImportEvent::DownloadFinished { .. } => "DownloadFinished",
            ImportEvent::SessionCompleted { .. } => "SessionCompleted",
            ImportEvent::SessionFailed { .. } => "SessionFailed",
            ImportEvent::SessionCancelled { .. } => "SessionCancelled",
        }
    }

    /// Build a log line event stamped now
    pub fn log(session_id: Option<Uuid>, severity: LogSeverity, message: impl Into<String>) -> Self {
        ImportEvent::Log {
            session_id,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for import events
///
/// Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ImportEvent,
    ) -> Result<usize, broadcast::error::SendError<ImportEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_log_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ImportEvent::log(None, LogSeverity::Warn, "image skipped"))
            .expect("one subscriber");

        match rx.recv().await.unwrap() {
            ImportEvent::Log { severity, message, .. } => {
                assert_eq!(severity, LogSeverity::Warn);
                assert_eq!(message, "image skipped");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(ImportEvent::log(None, LogSeverity::Info, "nobody listens"));
        assert!(bus.emit(ImportEvent::log(None, LogSeverity::Info, "x")).is_err());
    }

    #[test]
    fn test_serialized_tag() {
        let event = ImportEvent::log(Some(Uuid::nil()), LogSeverity::Error, "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Log");
        assert_eq!(json["severity"], "ERROR");
        assert_eq!(event.event_type(), "Log");
    }
}
