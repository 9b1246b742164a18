//! HTTP handlers for the Dispatch API

pub mod route;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::DispatchError;
use crate::services::route_store::RouteStore;
use crate::types::ErrorResponse;

/// Shared handler state
pub type AppState = Arc<RouteStore>;

/// Build the Axum router
pub fn build_router(store: AppState) -> Router {
    Router::new()
        .route("/routes", get(route::get_route))
        .route("/routes/optimize", post(route::optimize_route))
        .route("/routes/stops", post(route::assign_stop))
        .route("/routes/stops/:stop_id/status", post(route::update_stop_status))
        .route("/routes/order", put(route::reorder_stops))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::RouteNotFound(_) | DispatchError::StopNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidTransition { .. }
            | DispatchError::StopNotReorderable { .. }
            | DispatchError::Conflict { .. }
            | DispatchError::DuplicateBooking(_) => StatusCode::CONFLICT,
            DispatchError::InvalidCoordinate { .. } | DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", self.code(), self);
        }
        (status, Json(ErrorResponse::new(self.code(), self.to_string()))).into_response()
    }
}
