//! Error types

use std::time::Duration;

use uuid::Uuid;

use crate::types::{RouteKey, StopStatus};

/// Geocoding failure. Never fatal: the stop is kept without a coordinate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    /// Address could not be resolved
    #[error("address not found")]
    NotFound,
    /// Backend unreachable, failing, or its circuit breaker is open
    #[error("geocoding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Backend asked us to slow down
    #[error("geocoding provider rate limited")]
    RateLimited,
}

impl GeocodeError {
    pub const fn code(&self) -> &'static str {
        match self {
            GeocodeError::NotFound => "GEOCODE_NOT_FOUND",
            GeocodeError::ProviderUnavailable(_) => "GEOCODE_UNAVAILABLE",
            GeocodeError::RateLimited => "GEOCODE_RATE_LIMITED",
        }
    }
}

/// Mapping provider failure. Recovered by falling back to the heuristic.
#[derive(thiserror::Error, Debug)]
pub enum ProviderOptimizeError {
    #[error("no mapping provider configured")]
    NotConfigured,
    #[error("mapping provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("mapping provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mapping provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed mapping provider response: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced to Dispatch API callers
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("no route for {0}")]
    RouteNotFound(RouteKey),
    #[error("stop {0} not found on route")]
    StopNotFound(Uuid),
    #[error("stop {stop_id} cannot move from {from} to {to}")]
    InvalidTransition {
        stop_id: Uuid,
        from: StopStatus,
        to: StopStatus,
    },
    #[error("stop {stop_id} is {status} and cannot be reordered")]
    StopNotReorderable { stop_id: Uuid, status: StopStatus },
    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error("booking {0} is already on this route")]
    DuplicateBooking(String),
    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub const fn code(&self) -> &'static str {
        match self {
            DispatchError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            DispatchError::StopNotFound(_) => "STOP_NOT_FOUND",
            DispatchError::InvalidTransition { .. } | DispatchError::StopNotReorderable { .. } => {
                "INVALID_TRANSITION"
            }
            DispatchError::Conflict { .. } => "CONFLICT",
            DispatchError::DuplicateBooking(_) => "DUPLICATE_BOOKING",
            DispatchError::InvalidCoordinate { .. } => "INVALID_COORDINATE",
            DispatchError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}
