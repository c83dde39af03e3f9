//! Import run state machine
//!
//! A run progresses IDLE → INITIALIZING → STREAMING and ends in exactly one of
//! COMPLETED, CANCELLED or FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ImportParameters;

/// Import run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportState {
    /// Registered, not yet started
    Idle,
    /// Provider, poll and caches being prepared
    Initializing,
    /// Consuming records from the source
    Streaming,
    /// All records consumed
    Completed,
    /// Cancelled by the operator
    Cancelled,
    /// Aborted by a run-fatal error
    Failed,
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: ImportState,
    pub new_state: ImportState,
    pub transitioned_at: DateTime<Utc>,
}

/// Running totals of one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    /// Records consumed from the source
    pub total: usize,
    /// Protocols inserted
    pub created: usize,
    /// Duplicates whose values differed from the stored protocol
    pub updated: usize,
    /// Records not written (policy skip or unchanged duplicate)
    pub skipped: usize,
}

/// Import run (in-memory state, persisted to `import_sessions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    pub session_id: Uuid,

    pub state: ImportState,

    /// Source label (file path or page URL)
    pub source: String,

    /// Result provider name
    pub provider: String,

    pub parameters: ImportParameters,

    pub counters: ImportCounters,

    /// First run-fatal error, rendered as text
    pub last_error: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Set on entering a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

impl ImportSession {
    pub fn new(source: String, provider: String, parameters: ImportParameters) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: ImportState::Idle,
            source,
            provider,
            parameters,
            counters: ImportCounters::default(),
            last_error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: ImportState) -> StateTransition {
        let transition = StateTransition {
            session_id: self.session_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if self.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    /// Keep the first run-fatal error only
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.last_error.is_none() {
            self.last_error = Some(message.into());
        }
    }

    pub fn elapsed_seconds(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0) as u64
    }

    /// Check if session is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            ImportState::Completed | ImportState::Cancelled | ImportState::Failed
        )
    }
}
