//! Server-Sent Events stream of import events
//!
//! Forwards every `ImportEvent` on the bus: session lifecycle, the operator
//! log lines and attachment download progress.

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use elect_common::ImportEvent;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional filter on GET /import/events
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only forward events of this session (plus lines not tied to any run)
    pub session_id: Option<Uuid>,
}

fn event_session(event: &ImportEvent) -> Option<Uuid> {
    match event {
        ImportEvent::SessionStarted { session_id, .. }
        | ImportEvent::SessionCompleted { session_id, .. }
        | ImportEvent::SessionFailed { session_id, .. }
        | ImportEvent::SessionCancelled { session_id, .. } => Some(*session_id),
        ImportEvent::Log { session_id, .. }
        | ImportEvent::DownloadStarted { session_id, .. }
        | ImportEvent::DownloadProgress { session_id, .. }
        | ImportEvent::DownloadFinished { session_id, .. } => *session_id,
    }
}

/// GET /import/events
pub async fn import_event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(session_id = ?filter.session_id, "New SSE client connected to import events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    let event = match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(missed)) => {
                            warn!("SSE: Client lagged, {} events dropped", missed);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if let (Some(wanted), Some(actual)) = (filter.session_id, event_session(&event)) {
                        if wanted != actual {
                            continue;
                        }
                    }

                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
