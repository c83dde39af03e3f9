//! Import workflow API handlers
//!
//! POST /import/start, GET /import/status, POST /import/cancel, GET /import/sessions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{ImportCounters, ImportSession, ImportState},
    services::ImportRequest,
    AppState,
};

/// POST /import/start response
#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub session_id: Uuid,
    pub state: ImportState,
    pub source: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
}

/// GET /import/status response
#[derive(Debug, Serialize)]
pub struct ImportStatusResponse {
    pub session_id: Uuid,
    pub state: ImportState,
    /// True while the run is registered in this process
    pub active: bool,
    pub source: String,
    pub provider: String,
    pub counters: ImportCounters,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
}

impl ImportStatusResponse {
    fn from_session(session: ImportSession, active: bool) -> Self {
        Self {
            session_id: session.session_id,
            state: session.state,
            active,
            elapsed_seconds: session.elapsed_seconds(),
            source: session.source,
            provider: session.provider,
            counters: session.counters,
            last_error: session.last_error,
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

/// POST /import/cancel response
#[derive(Debug, Serialize)]
pub struct CancelImportResponse {
    pub session_id: Uuid,
    /// State at the time of the request; an active run settles asynchronously
    pub state: ImportState,
    pub records_processed: usize,
    pub requested_at: DateTime<Utc>,
}

/// GET /import/sessions query
#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// POST /import/start
///
/// Registers the run and returns 202 Accepted; progress is reported over
/// GET /import/events and GET /import/status.
pub async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<(StatusCode, Json<StartImportResponse>)> {
    let session = state.manager.start(request).await?;

    tracing::info!(
        session_id = %session.session_id,
        source = %session.source,
        "Import session started"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartImportResponse {
            session_id: session.session_id,
            state: session.state,
            source: session.source,
            provider: session.provider,
            started_at: session.started_at,
        }),
    ))
}

/// GET /import/status/{session_id}
pub async fn get_import_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ImportStatusResponse>> {
    let session = crate::db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Import session not found: {}", session_id)))?;

    tracing::debug!(session_id = %session_id, state = ?session.state, "Status query");

    let active = state.manager.is_active(session_id).await;
    Ok(Json(ImportStatusResponse::from_session(session, active)))
}

/// POST /import/cancel/{session_id}
///
/// Signals an active run. A session left non-terminal by a previous process
/// is marked CANCELLED directly.
pub async fn cancel_import(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelImportResponse>> {
    let mut session = crate::db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Import session not found: {}", session_id)))?;

    if session.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Import session already in terminal state: {:?}",
            session.state
        )));
    }

    if !state.manager.cancel(session_id).await {
        session.transition_to(ImportState::Cancelled);
        crate::db::sessions::save_session(&state.db, &session).await?;
        tracing::warn!(session_id = %session_id, "Stale import session marked cancelled");
    }

    Ok(Json(CancelImportResponse {
        session_id,
        state: session.state,
        records_processed: session.counters.total,
        requested_at: Utc::now(),
    }))
}

/// GET /import/sessions
pub async fn list_import_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Json<Vec<ImportStatusResponse>>> {
    let limit = query.limit.clamp(1, 500);
    let sessions = crate::db::sessions::list_sessions(&state.db, limit).await?;

    let active = state.manager.active_session().await;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| {
                let is_active = active == Some(s.session_id);
                ImportStatusResponse::from_session(s, is_active)
            })
            .collect(),
    ))
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/start", post(start_import))
        .route("/import/status/:session_id", get(get_import_status))
        .route("/import/cancel/:session_id", post(cancel_import))
        .route("/import/sessions", get(list_import_sessions))
}
