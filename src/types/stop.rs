//! Stop types

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Build coordinates, rejecting values outside the WGS84 range
    pub fn new(lat: f64, lng: f64) -> Result<Self, DispatchError> {
        let coords = Self { lat, lng };
        coords.validate()?;
        Ok(coords)
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DispatchError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// Time window agreed with the customer at booking time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Stop status
///
/// `pending -> en_route -> arrived -> completed`, with `skipped` reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Pending,
    EnRoute,
    Arrived,
    Completed,
    Skipped,
}

impl StopStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            StopStatus::Pending => "pending",
            StopStatus::EnRoute => "en_route",
            StopStatus::Arrived => "arrived",
            StopStatus::Completed => "completed",
            StopStatus::Skipped => "skipped",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, StopStatus::Completed | StopStatus::Skipped)
    }

    pub const fn is_pending(self) -> bool {
        matches!(self, StopStatus::Pending)
    }

    /// Whether `self -> next` is a legal forward transition
    pub const fn can_transition_to(self, next: StopStatus) -> bool {
        match (self, next) {
            (StopStatus::Pending, StopStatus::EnRoute) => true,
            (StopStatus::EnRoute, StopStatus::Arrived) => true,
            (StopStatus::Arrived, StopStatus::Completed) => true,
            (from, StopStatus::Skipped) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for StopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stop on a worker's route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: Uuid,
    pub booking_ref: String,
    pub address: String,
    /// `None` when geocoding failed; such stops are not distance-ordered
    pub coordinate: Option<Coordinates>,
    pub service_duration_minutes: u32,
    /// 1-based position in the route
    pub sequence_order: u32,
    pub status: StopStatus,
    pub distance_from_previous_km: f64,
    /// Travel time of the inbound leg
    #[serde(default)]
    pub duration_from_previous_minutes: f64,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_window: Option<TimeWindow>,
    /// Placed after optimization without distance ordering
    #[serde(default)]
    pub unoptimized: bool,
}

impl Stop {
    pub fn new(
        booking_ref: impl Into<String>,
        address: impl Into<String>,
        coordinate: Option<Coordinates>,
        service_duration_minutes: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_ref: booking_ref.into(),
            address: address.into(),
            coordinate,
            service_duration_minutes,
            sequence_order: 0,
            status: StopStatus::Pending,
            distance_from_previous_km: 0.0,
            duration_from_previous_minutes: 0.0,
            estimated_arrival: None,
            actual_arrival: None,
            completed_at: None,
            scheduled_window: None,
            unoptimized: coordinate.is_none(),
        }
    }

    /// Arrival used for timing: the actual one once known
    pub fn effective_arrival(&self) -> Option<DateTime<Utc>> {
        self.actual_arrival.or(self.estimated_arrival)
    }
}
