//! Route types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, Stop, StopStatus};

/// Identity of a route: one per worker per day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteKey {
    pub worker_id: Uuid,
    pub date: NaiveDate,
}

impl RouteKey {
    pub fn new(worker_id: Uuid, date: NaiveDate) -> Self {
        Self { worker_id, date }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.worker_id, self.date)
    }
}

/// Route status, derived from stop statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Planned,
    InProgress,
    Completed,
}

impl RouteStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            RouteStatus::Planned => "planned",
            RouteStatus::InProgress => "in_progress",
            RouteStatus::Completed => "completed",
        }
    }
}

/// Which ordering strategy produced the current stop order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Provider,
    Heuristic,
}

impl RouteSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            RouteSource::Provider => "provider",
            RouteSource::Heuristic => "heuristic",
        }
    }
}

/// Warning about route issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteWarning {
    pub stop_id: Option<Uuid>,
    pub warning_type: String,
    pub message: String,
}

impl RouteWarning {
    pub fn new(stop_id: Option<Uuid>, warning_type: &str, message: impl Into<String>) -> Self {
        Self {
            stop_id,
            warning_type: warning_type.to_string(),
            message: message.into(),
        }
    }
}

/// Route entity (a worker's stops for one day)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub date: NaiveDate,
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: u32,
    pub source: Option<RouteSource>,
    pub optimized_at: Option<DateTime<Utc>>,
    /// Departure time the ETA chain starts from
    pub start_time: DateTime<Utc>,
    pub origin: Option<Coordinates>,
    pub warnings: Vec<RouteWarning>,
    /// Bumped by the repository on every successful save
    pub version: u64,
}

impl Route {
    pub fn new(key: RouteKey, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_id: key.worker_id,
            date: key.date,
            stops: Vec::new(),
            total_distance_km: 0.0,
            total_duration_minutes: 0,
            source: None,
            optimized_at: None,
            start_time,
            origin: None,
            warnings: Vec::new(),
            version: 0,
        }
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.worker_id, self.date)
    }

    pub fn status(&self) -> RouteStatus {
        if self.stops.iter().all(|s| s.status.is_pending()) {
            RouteStatus::Planned
        } else if self.stops.iter().all(|s| s.status.is_terminal()) {
            RouteStatus::Completed
        } else {
            RouteStatus::InProgress
        }
    }

    pub fn stop_index(&self, stop_id: Uuid) -> Option<usize> {
        self.stops.iter().position(|s| s.id == stop_id)
    }

    pub fn has_booking(&self, booking_ref: &str) -> bool {
        self.stops.iter().any(|s| s.booking_ref == booking_ref)
    }

    /// Rewrite `sequence_order` to match list position (1-based)
    pub fn renumber(&mut self) {
        for (i, stop) in self.stops.iter_mut().enumerate() {
            stop.sequence_order = (i + 1) as u32;
        }
    }

    /// Recompute totals from the stops that are still part of the day
    pub fn recompute_totals(&mut self) {
        let (km, travel, service) = self
            .stops
            .iter()
            .filter(|s| s.status != StopStatus::Skipped)
            .fold((0.0, 0.0, 0u32), |(km, travel, service), stop| {
                (
                    km + stop.distance_from_previous_km,
                    travel + stop.duration_from_previous_minutes,
                    service + stop.service_duration_minutes,
                )
            });
        self.total_distance_km = km;
        self.total_duration_minutes = travel.round() as u32 + service;
    }
}
