//! Route endpoints

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::error::DispatchError;
use crate::types::{
    AssignStopRequest, OptimizeRouteRequest, ReorderStopsRequest, RouteQuery, RouteResponse, StopStatusUpdate,
};

type ApiResult = Result<Json<RouteResponse>, DispatchError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, DispatchError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| DispatchError::InvalidRequest(e.body_text()))
}

/// GET /routes?worker_id=..&date=..
pub async fn get_route(State(store): State<AppState>, query: Result<Query<RouteQuery>, QueryRejection>) -> ApiResult {
    let Query(query) = query.map_err(|e| DispatchError::InvalidRequest(e.body_text()))?;
    debug!("Fetching route for {}", query.key());
    let route = store.get_route(query.key()).await?;
    Ok(Json(route.into()))
}

/// POST /routes/optimize
pub async fn optimize_route(
    State(store): State<AppState>,
    payload: Result<Json<OptimizeRouteRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let route = store.optimize(request).await?;
    Ok(Json(route.into()))
}

/// POST /routes/stops
pub async fn assign_stop(
    State(store): State<AppState>,
    payload: Result<Json<AssignStopRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let route = store.assign_stop(request).await?;
    Ok(Json(route.into()))
}

/// POST /routes/stops/:stop_id/status
pub async fn update_stop_status(
    State(store): State<AppState>,
    Path(stop_id): Path<Uuid>,
    payload: Result<Json<StopStatusUpdate>, JsonRejection>,
) -> ApiResult {
    let update = body(payload)?;
    let route = store.update_stop_status(stop_id, update).await?;
    Ok(Json(route.into()))
}

/// PUT /routes/order
pub async fn reorder_stops(
    State(store): State<AppState>,
    payload: Result<Json<ReorderStopsRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let route = store.reorder_stops(request).await?;
    Ok(Json(route.into()))
}
