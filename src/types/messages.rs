//! Dispatch API message types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, Route, RouteKey, RouteStatus, StopStatus, TimeWindow};

/// Query for `GET /routes`
#[derive(Debug, Clone, Deserialize)]
pub struct RouteQuery {
    pub worker_id: Uuid,
    pub date: NaiveDate,
}

impl RouteQuery {
    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.worker_id, self.date)
    }
}

/// Request to optimize a worker's route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRouteRequest {
    #[serde(alias = "worker_id")]
    pub worker_id: Uuid,
    pub date: NaiveDate,
    /// Overrides the configured depot
    #[serde(default)]
    pub origin: Option<Coordinates>,
    /// Overrides the route's start time for the ETA chain
    #[serde(default, alias = "start_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "expected_version")]
    pub expected_version: Option<u64>,
}

/// Booking subsystem call: assign a stop to a worker's route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignStopRequest {
    #[serde(alias = "worker_id")]
    pub worker_id: Uuid,
    pub date: NaiveDate,
    #[serde(alias = "booking_ref")]
    pub booking_ref: String,
    pub address: String,
    #[serde(default, alias = "service_duration_minutes")]
    pub service_duration_minutes: Option<u32>,
    #[serde(default, alias = "scheduled_window")]
    pub scheduled_window: Option<TimeWindow>,
    /// Pre-resolved coordinate; skips geocoding when present
    #[serde(default)]
    pub coordinate: Option<Coordinates>,
}

/// Field status update for one stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopStatusUpdate {
    #[serde(alias = "worker_id")]
    pub worker_id: Uuid,
    pub date: NaiveDate,
    pub status: StopStatus,
    /// Observed time of the transition; defaults to now for arrived/completed
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "expected_version")]
    pub expected_version: Option<u64>,
}

/// Manual reorder of a route's stops
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderStopsRequest {
    #[serde(alias = "worker_id")]
    pub worker_id: Uuid,
    pub date: NaiveDate,
    #[serde(alias = "stop_ids")]
    pub stop_ids: Vec<Uuid>,
    #[serde(default, alias = "expected_version")]
    pub expected_version: Option<u64>,
}

/// Route as served to collaborators, with its derived status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    #[serde(flatten)]
    pub route: Route,
    pub status: RouteStatus,
}

impl From<Route> for RouteResponse {
    fn from(route: Route) -> Self {
        let status = route.status();
        Self { route, status }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
