//! Read-only browsing of stored regions, commissions and protocols

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{Commission, Protocol, Region},
    AppState,
};

/// GET /regions
pub async fn list_regions(State(state): State<AppState>) -> ApiResult<Json<Vec<Region>>> {
    Ok(Json(db::regions::load_all_regions(&state.db).await?))
}

/// GET /regions/{region_id}/commissions
pub async fn list_region_commissions(
    State(state): State<AppState>,
    Path(region_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Commission>>> {
    if db::regions::load_region(&state.db, region_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Region not found: {}", region_id)));
    }
    Ok(Json(
        db::commissions::load_region_commissions(&state.db, region_id).await?,
    ))
}

/// GET /commissions/{commission_id}/protocols
///
/// Every provider's protocol for the commission, with results and image URIs.
pub async fn list_commission_protocols(
    State(state): State<AppState>,
    Path(commission_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Protocol>>> {
    Ok(Json(
        db::protocols::load_commission_protocols(&state.db, commission_id).await?,
    ))
}

pub fn browse_routes() -> Router<AppState> {
    Router::new()
        .route("/regions", get(list_regions))
        .route("/regions/:region_id/commissions", get(list_region_commissions))
        .route("/commissions/:commission_id/protocols", get(list_commission_protocols))
}
