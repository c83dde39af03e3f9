//! Operator-visible log stream of an import run
//!
//! Every line goes to `tracing` at the matching level and, when an event bus
//! is attached, out as `ImportEvent::Log`.

use elect_common::{EventBus, ImportEvent, LogSeverity};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct RunLog {
    session_id: Option<Uuid>,
    event_bus: Option<EventBus>,
}

impl RunLog {
    pub fn new(session_id: Option<Uuid>, event_bus: Option<EventBus>) -> Self {
        Self {
            session_id,
            event_bus,
        }
    }

    /// Log that only reaches `tracing`
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.write(LogSeverity::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.write(LogSeverity::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.write(LogSeverity::Error, message.into());
    }

    fn write(&self, severity: LogSeverity, message: String) {
        let session = self.session_id.map(|id| id.to_string()).unwrap_or_default();
        match severity {
            LogSeverity::Info => tracing::info!(session_id = %session, "{}", message),
            LogSeverity::Warn => tracing::warn!(session_id = %session, "{}", message),
            LogSeverity::Error => tracing::error!(session_id = %session, "{}", message),
        }

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(ImportEvent::log(self.session_id, severity, message));
        }
    }
}
