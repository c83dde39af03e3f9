//! elect-loader library interface
//!
//! Imports precinct-level election protocols from delimited files and from
//! a scraped results page, reconciles them against the SQLite store and
//! exposes run control over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use elect_common::EventBus;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::services::ImportManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Registry of import runs
    pub manager: ImportManager,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: ImportManager) -> Self {
        let services = manager.services();
        Self {
            db: services.db.clone(),
            event_bus: services.event_bus.clone(),
            manager,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::import_routes())
        .route("/import/events", get(api::import_event_stream))
        .merge(api::browse_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
