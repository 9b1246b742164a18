//! ETA projection for a route's stops.
//!
//! Walks the ordered stops from a point of change and rewrites
//! `estimated_arrival` for every stop that is still waiting to be reached.
//! Stops already reached (actual arrival known) anchor the chain; skipped
//! stops contribute neither travel nor service time. Only the tail after the
//! point of change is touched.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::services::geo::{haversine_distance, travel_minutes};
use crate::types::{Coordinates, Stop, StopStatus};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn whole_seconds(minutes: f64) -> Duration {
    Duration::seconds((minutes * 60.0).round() as i64)
}

fn is_active(stop: &Stop) -> bool {
    stop.status != StopStatus::Skipped
}

/// When the worker leaves (or is expected to leave) `stop`
fn departure(stop: &Stop) -> Option<DateTime<Utc>> {
    stop.completed_at.or_else(|| {
        stop.effective_arrival()
            .map(|arrival| arrival + Duration::minutes(stop.service_duration_minutes as i64))
    })
}

/// Stops after `index` whose estimate may still move
fn shiftable(stop: &Stop) -> bool {
    !stop.status.is_terminal() && stop.actual_arrival.is_none()
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct EtaProjector {
    speed_kmh: f64,
}

impl EtaProjector {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Project every stop from the route start
    pub fn project_all(&self, stops: &mut [Stop], start_time: DateTime<Utc>) {
        self.project_from(stops, 0, start_time);
    }

    /// Recompute estimates for `stops[from..]`.
    ///
    /// The chain starts at the departure of the last active stop before
    /// `from`, or at `start_time` when there is none. Stops with an actual
    /// arrival keep it and re-anchor the chain.
    pub fn project_from(&self, stops: &mut [Stop], from: usize, start_time: DateTime<Utc>) {
        let mut anchor = stops[..from.min(stops.len())]
            .iter()
            .rev()
            .filter(|s| is_active(s))
            .find_map(departure)
            .unwrap_or(start_time);
        let mut elapsed_minutes = 0.0;

        for stop in stops.iter_mut().skip(from) {
            if !is_active(stop) {
                continue;
            }
            if stop.actual_arrival.is_some() {
                if let Some(left) = departure(stop) {
                    anchor = left;
                    elapsed_minutes = 0.0;
                }
                continue;
            }

            elapsed_minutes += travel_minutes(stop.distance_from_previous_km, self.speed_kmh);
            stop.estimated_arrival = Some(anchor + whole_seconds(elapsed_minutes));
            elapsed_minutes += stop.service_duration_minutes as f64;
        }

        debug!("Projected ETAs for {} stops from position {}", stops.len().saturating_sub(from), from);
    }

    /// Record an observed arrival at `stops[index]` and shift the stops
    /// after it by the difference to its previous estimate.
    pub fn apply_actual_arrival(&self, stops: &mut [Stop], index: usize, at: DateTime<Utc>, start_time: DateTime<Utc>) {
        let previous = stops[index].estimated_arrival;
        stops[index].actual_arrival = Some(at);
        stops[index].estimated_arrival = Some(at);

        match previous {
            Some(previous) => shift_after(stops, index, at - previous),
            None => self.project_from(stops, index + 1, start_time),
        }
    }

    /// Record a completion time. Without a prior arrival the timestamp is the
    /// arrival; otherwise the stops after it shift by the overrun against
    /// `actual_arrival + service`.
    pub fn apply_completion(&self, stops: &mut [Stop], index: usize, at: DateTime<Utc>, start_time: DateTime<Utc>) {
        let Some(arrived) = stops[index].actual_arrival else {
            self.apply_actual_arrival(stops, index, at, start_time);
            return;
        };

        let expected = arrived + Duration::minutes(stops[index].service_duration_minutes as i64);
        stops[index].completed_at = Some(at);
        shift_after(stops, index, at - expected);
    }

    /// Take a freshly skipped stop out of the chain: the next active stop's
    /// inbound leg is re-measured from the last active position and the tail
    /// is recomputed from there.
    pub fn apply_skip(&self, stops: &mut [Stop], index: usize, origin: Option<Coordinates>, start_time: DateTime<Utc>) {
        let Some(next) = (index + 1..stops.len()).find(|&i| is_active(&stops[i])) else {
            return;
        };
        self.remeasure_leg(stops, next, origin);
        self.project_from(stops, next, start_time);
    }

    /// Set the inbound leg of `stops[index]` from the last active located
    /// stop before it, or from `origin`. Without either end the leg is zero.
    pub fn remeasure_leg(&self, stops: &mut [Stop], index: usize, origin: Option<Coordinates>) {
        let from = stops[..index]
            .iter()
            .rev()
            .filter(|s| is_active(s))
            .find_map(|s| s.coordinate)
            .or(origin);

        let km = match (from, stops[index].coordinate) {
            (Some(from), Some(to)) => haversine_distance(&from, &to),
            _ => 0.0,
        };
        stops[index].distance_from_previous_km = km;
        stops[index].duration_from_previous_minutes = travel_minutes(km, self.speed_kmh);
    }
}

fn shift_after(stops: &mut [Stop], index: usize, delta: Duration) {
    if delta == Duration::zero() {
        return;
    }
    for stop in stops.iter_mut().skip(index + 1).filter(|s| shiftable(s)) {
        if let Some(estimate) = stop.estimated_arrival {
            stop.estimated_arrival = Some(estimate + delta);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
