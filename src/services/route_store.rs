//! Route store: the per-(worker, date) state machine behind the Dispatch API
//!
//! Every operation loads the current route, builds a new value and writes it
//! back with a version check. Operations on the same route are serialized by
//! a per-route async mutex; different routes never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::RouteRepository;
use crate::error::DispatchError;
use crate::services::eta::EtaProjector;
use crate::services::geocoding::Geocoder;
use crate::services::routing::RouteOptimizer;
use crate::types::{
    AssignStopRequest, Coordinates, OptimizeRouteRequest, ReorderStopsRequest, Route, RouteKey, RouteWarning, Stop,
    StopStatus, StopStatusUpdate,
};

/// Warning types produced outside optimization; they survive a re-optimize
const GEOCODE_FAILED: &str = "GEOCODE_FAILED";

/// Route defaults taken from configuration
#[derive(Debug, Clone)]
pub struct RouteDefaults {
    pub depot: Option<Coordinates>,
    pub workday_start: NaiveTime,
    pub default_service_minutes: u32,
}

impl From<&Config> for RouteDefaults {
    fn from(config: &Config) -> Self {
        Self {
            depot: config.depot,
            workday_start: config.workday_start,
            default_service_minutes: config.default_service_minutes,
        }
    }
}

type RouteLock = Arc<tokio::sync::Mutex<()>>;

/// Exclusive hold on one route. Dropping it releases the route and forgets
/// its lock once nobody else is waiting on it.
struct RouteLease<'a> {
    locks: &'a parking_lot::Mutex<HashMap<RouteKey, RouteLock>>,
    key: RouteKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for RouteLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

pub struct RouteStore {
    repository: Arc<dyn RouteRepository>,
    geocoder: Arc<dyn Geocoder>,
    optimizer: RouteOptimizer,
    projector: EtaProjector,
    defaults: RouteDefaults,
    locks: parking_lot::Mutex<HashMap<RouteKey, RouteLock>>,
}

impl RouteStore {
    pub fn new(
        repository: Arc<dyn RouteRepository>,
        geocoder: Arc<dyn Geocoder>,
        optimizer: RouteOptimizer,
        defaults: RouteDefaults,
    ) -> Self {
        let projector = EtaProjector::new(optimizer.speed_kmh());
        Self {
            repository,
            geocoder,
            optimizer,
            projector,
            defaults,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    async fn lock_route(&self, key: RouteKey) -> RouteLease<'_> {
        let lock = self.locks.lock().entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        RouteLease {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    fn default_start(&self, key: &RouteKey) -> DateTime<Utc> {
        key.date.and_time(self.defaults.workday_start).and_utc()
    }

    fn origin_of(&self, route: &Route) -> Option<Coordinates> {
        route.origin.or(self.defaults.depot)
    }

    async fn load(&self, key: &RouteKey) -> Result<Route, DispatchError> {
        self.repository
            .get(key)
            .await?
            .ok_or(DispatchError::RouteNotFound(*key))
    }

    /// Current route for a worker and day
    pub async fn get_route(&self, key: RouteKey) -> Result<Route, DispatchError> {
        self.load(&key).await
    }

    /// Append a booked stop to the pending tail, creating the route on first use
    pub async fn assign_stop(&self, request: AssignStopRequest) -> Result<Route, DispatchError> {
        let booking_ref = request.booking_ref.trim();
        if booking_ref.is_empty() {
            return Err(DispatchError::InvalidRequest("bookingRef must not be empty".to_string()));
        }
        if request.address.trim().is_empty() && request.coordinate.is_none() {
            return Err(DispatchError::InvalidRequest("address must not be empty".to_string()));
        }
        if let Some(coordinate) = &request.coordinate {
            coordinate.validate()?;
        }
        if let Some(window) = &request.scheduled_window {
            if window.end <= window.start {
                return Err(DispatchError::InvalidRequest("scheduledWindow must end after it starts".to_string()));
            }
        }

        let key = RouteKey::new(request.worker_id, request.date);
        let _lease = self.lock_route(key).await;

        let mut route = match self.repository.get(&key).await? {
            Some(route) => route,
            None => Route::new(key, self.default_start(&key)),
        };
        let expected_version = route.version;

        if route.has_booking(booking_ref) {
            return Err(DispatchError::DuplicateBooking(booking_ref.to_string()));
        }

        let service = request
            .service_duration_minutes
            .unwrap_or(self.defaults.default_service_minutes);
        let mut stop = Stop::new(booking_ref, request.address.trim(), request.coordinate, service);
        stop.scheduled_window = request.scheduled_window;

        if stop.coordinate.is_none() {
            match self.geocoder.geocode(&stop.address).await {
                Ok(coordinate) => {
                    stop.coordinate = Some(coordinate);
                    stop.unoptimized = false;
                }
                Err(e) => {
                    warn!("Geocoding '{}' failed ({}), stop kept without coordinates", stop.address, e);
                    route.warnings.push(RouteWarning::new(
                        Some(stop.id),
                        GEOCODE_FAILED,
                        format!("{}: {}", e.code(), e),
                    ));
                }
            }
        }

        let stop_id = stop.id;
        route.stops.push(stop);
        route.renumber();

        let index = route.stops.len() - 1;
        let origin = self.origin_of(&route);
        self.projector.remeasure_leg(&mut route.stops, index, origin);
        self.projector.project_from(&mut route.stops, index, route.start_time);
        route.recompute_totals();

        let saved = self.repository.save(route, expected_version).await?;
        info!("Assigned stop {} ({}) to route {}", stop_id, booking_ref, key);
        Ok(saved)
    }

    /// Reorder the pending stops of a route and refresh its ETAs.
    ///
    /// Only pending stops after the last started stop move. A missing
    /// route yields an empty, unsaved route.
    pub async fn optimize(&self, request: OptimizeRouteRequest) -> Result<Route, DispatchError> {
        if let Some(origin) = &request.origin {
            origin.validate()?;
        }

        let key = RouteKey::new(request.worker_id, request.date);
        let _lease = self.lock_route(key).await;

        let Some(mut route) = self.repository.get(&key).await? else {
            debug!("Optimize requested for unknown route {}, returning empty route", key);
            let mut route = Route::new(key, request.start_time.unwrap_or_else(|| self.default_start(&key)));
            route.origin = request.origin;
            let result = self.optimizer.optimize(self.origin_of(&route), Vec::new()).await;
            route.source = Some(result.source);
            route.optimized_at = Some(Utc::now());
            return Ok(route);
        };
        check_version(&route, request.expected_version)?;
        let expected_version = route.version;

        if let Some(origin) = request.origin {
            route.origin = Some(origin);
        }
        if let Some(start_time) = request.start_time {
            route.start_time = start_time;
        }

        // Only the pending tail after the last started stop is reordered;
        // pending stops ahead of it keep their slots.
        let mut stops = std::mem::take(&mut route.stops);
        let tail_start = stops
            .iter()
            .rposition(|s| !s.status.is_pending())
            .map_or(0, |i| i + 1);
        let tail = stops.split_off(tail_start);

        // Predecessor of the first tail stop along the list
        let origin = stops
            .iter()
            .rev()
            .filter(|s| s.status != StopStatus::Skipped)
            .find_map(|s| s.coordinate)
            .or_else(|| self.origin_of(&route));

        let reordered = !tail.is_empty();
        let result = self.optimizer.optimize(origin, tail).await;
        stops.extend(result.ordered_stops);

        route.stops = stops;
        route.renumber();
        route.warnings.retain(|w| w.warning_type == GEOCODE_FAILED);
        route.warnings.extend(result.warnings);
        route.source = Some(result.source);
        route.optimized_at = Some(Utc::now());

        if reordered {
            self.projector.project_from(&mut route.stops, tail_start, route.start_time);
        }
        route.recompute_totals();

        let saved = self.repository.save(route, expected_version).await?;
        info!(
            "Optimized route {}: {} stops, {:.1} km, source={}",
            key,
            saved.stops.len(),
            saved.total_distance_km,
            result.source.as_str()
        );
        Ok(saved)
    }

    /// Apply a field status change to one stop and re-propagate ETAs
    pub async fn update_stop_status(&self, stop_id: Uuid, update: StopStatusUpdate) -> Result<Route, DispatchError> {
        let key = RouteKey::new(update.worker_id, update.date);
        let _lease = self.lock_route(key).await;

        let mut route = self.load(&key).await?;
        check_version(&route, update.expected_version)?;
        let expected_version = route.version;

        let index = route.stop_index(stop_id).ok_or(DispatchError::StopNotFound(stop_id))?;
        let from = route.stops[index].status;
        let to = update.status;
        if !from.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition { stop_id, from, to });
        }
        route.stops[index].status = to;

        let at = update.timestamp.unwrap_or_else(Utc::now);
        let start_time = route.start_time;
        match to {
            StopStatus::Arrived => {
                self.projector.apply_actual_arrival(&mut route.stops, index, at, start_time);
            }
            StopStatus::Completed => {
                self.projector.apply_completion(&mut route.stops, index, at, start_time);
            }
            StopStatus::Skipped => {
                let origin = self.origin_of(&route);
                self.projector.apply_skip(&mut route.stops, index, origin, start_time);
            }
            StopStatus::EnRoute | StopStatus::Pending => {}
        }
        route.recompute_totals();

        let saved = self.repository.save(route, expected_version).await?;
        info!(
            "Stop {} on route {}: {} -> {} (route {})",
            stop_id,
            key,
            from,
            to,
            saved.status().as_str()
        );
        Ok(saved)
    }

    /// Manually set the stop order. Only pending stops may move.
    pub async fn reorder_stops(&self, request: ReorderStopsRequest) -> Result<Route, DispatchError> {
        let key = RouteKey::new(request.worker_id, request.date);
        let _lease = self.lock_route(key).await;

        let mut route = self.load(&key).await?;
        check_version(&route, request.expected_version)?;
        let expected_version = route.version;

        if request.stop_ids.len() != route.stops.len() {
            return Err(DispatchError::InvalidRequest(format!(
                "expected {} stop ids, got {}",
                route.stops.len(),
                request.stop_ids.len()
            )));
        }

        let mut slots: Vec<Option<Stop>> = std::mem::take(&mut route.stops).into_iter().map(Some).collect();
        let positions: HashMap<Uuid, usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (s.id, i)))
            .collect();

        let mut reordered = Vec::with_capacity(slots.len());
        for id in &request.stop_ids {
            let position = *positions.get(id).ok_or(DispatchError::StopNotFound(*id))?;
            let stop = slots[position]
                .take()
                .ok_or_else(|| DispatchError::InvalidRequest(format!("stop {} listed twice", id)))?;
            reordered.push(stop);
        }

        for (i, stop) in reordered.iter().enumerate() {
            if !stop.status.is_pending() && positions[&stop.id] != i {
                return Err(DispatchError::StopNotReorderable {
                    stop_id: stop.id,
                    status: stop.status,
                });
            }
        }

        let first_changed = reordered
            .iter()
            .enumerate()
            .position(|(i, s)| positions[&s.id] != i);

        route.stops = reordered;
        route.renumber();

        if let Some(first_changed) = first_changed {
            let origin = self.origin_of(&route);
            for i in first_changed..route.stops.len() {
                self.projector.remeasure_leg(&mut route.stops, i, origin);
            }
            self.projector.project_from(&mut route.stops, first_changed, route.start_time);
            route.recompute_totals();
        }

        let saved = self.repository.save(route, expected_version).await?;
        info!("Reordered route {}", key);
        Ok(saved)
    }
}

fn check_version(route: &Route, expected: Option<u64>) -> Result<(), DispatchError> {
    match expected {
        Some(expected) if expected != route.version => Err(DispatchError::Conflict {
            expected,
            actual: route.version,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryRouteRepository;
    use crate::error::GeocodeError;
    use crate::services::geo::haversine_distance;
    use crate::services::geocoding::MockGeocoder;
    use crate::types::{RouteSource, RouteStatus};
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, TimeZone};
    use tokio_test::{assert_err, assert_ok};

    struct FailingGeocoder;

    #[async_trait]
    impl Geocoder for FailingGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Coordinates, GeocodeError> {
            Err(GeocodeError::RateLimited)
        }

        async fn reverse_geocode(&self, _coords: &Coordinates) -> Result<String, GeocodeError> {
            Err(GeocodeError::RateLimited)
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn depot() -> Coordinates {
        Coordinates { lat: 11.00, lng: 77.00 }
    }

    fn store_with(geocoder: Arc<dyn Geocoder>) -> RouteStore {
        RouteStore::new(
            Arc::new(InMemoryRouteRepository::new()),
            geocoder,
            RouteOptimizer::new(30.0),
            RouteDefaults {
                depot: Some(depot()),
                workday_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                default_service_minutes: 30,
            },
        )
    }

    fn store() -> RouteStore {
        store_with(Arc::new(MockGeocoder::new()))
    }

    fn key() -> RouteKey {
        RouteKey::new(Uuid::from_u128(7), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
    }

    fn assign(booking: &str, coordinate: Option<Coordinates>) -> AssignStopRequest {
        AssignStopRequest {
            worker_id: key().worker_id,
            date: key().date,
            booking_ref: booking.to_string(),
            address: format!("{} Main St", booking),
            service_duration_minutes: None,
            scheduled_window: None,
            coordinate,
        }
    }

    fn optimize_request() -> OptimizeRouteRequest {
        OptimizeRouteRequest {
            worker_id: key().worker_id,
            date: key().date,
            origin: None,
            start_time: None,
            expected_version: None,
        }
    }

    fn status(status: StopStatus, timestamp: Option<DateTime<Utc>>) -> StopStatusUpdate {
        StopStatusUpdate {
            worker_id: key().worker_id,
            date: key().date,
            status,
            timestamp,
            expected_version: None,
        }
    }

    fn reorder(stop_ids: Vec<Uuid>) -> ReorderStopsRequest {
        ReorderStopsRequest {
            worker_id: key().worker_id,
            date: key().date,
            stop_ids,
            expected_version: None,
        }
    }

    /// B, C, D of the depot scenario assigned in that order
    async fn scenario_store() -> RouteStore {
        let store = store();
        for (booking, lat, lng) in [("B", 11.02, 77.01), ("C", 11.10, 77.20), ("D", 11.01, 77.02)] {
            assert_ok!(store.assign_stop(assign(booking, Some(Coordinates { lat, lng }))).await);
        }
        store
    }

    fn bookings(route: &Route) -> Vec<&str> {
        route.stops.iter().map(|s| s.booking_ref.as_str()).collect()
    }

    #[tokio::test]
    async fn test_get_missing_route() {
        let err = store().get_route(key()).await.unwrap_err();
        assert_eq!(err.code(), "ROUTE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_assign_creates_route_lazily() {
        let store = store();
        let route = store.assign_stop(assign("BK-1", None)).await.unwrap();

        assert_eq!(route.version, 1);
        assert_eq!(route.stops.len(), 1);
        assert_eq!(route.stops[0].sequence_order, 1);
        assert!(route.stops[0].coordinate.is_some());
        assert!(route.stops[0].estimated_arrival.is_some());
        assert!(route.source.is_none());
        assert_eq!(route.status(), RouteStatus::Planned);
        assert_eq!(store.get_route(key()).await.unwrap(), route);
    }

    #[tokio::test]
    async fn test_assign_rejects_duplicate_booking() {
        let store = store();
        assert_ok!(store.assign_stop(assign("BK-1", None)).await);
        let err = store.assign_stop(assign("BK-1", None)).await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_BOOKING");
        assert_eq!(store.get_route(key()).await.unwrap().stops.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_validates_input() {
        let store = store();
        assert_err!(store.assign_stop(assign("  ", None)).await);
        let err = store
            .assign_stop(assign("BK-1", Some(Coordinates { lat: 91.0, lng: 0.0 })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_COORDINATE");
    }

    #[tokio::test]
    async fn test_geocode_failure_keeps_stop_with_warning() {
        let store = store_with(Arc::new(FailingGeocoder));
        let route = store.assign_stop(assign("BK-1", None)).await.unwrap();

        assert!(route.stops[0].coordinate.is_none());
        assert!(route.stops[0].unoptimized);
        assert_eq!(route.warnings.len(), 1);
        assert_eq!(route.warnings[0].warning_type, GEOCODE_FAILED);
        assert_eq!(route.warnings[0].stop_id, Some(route.stops[0].id));
    }

    #[tokio::test]
    async fn test_assign_leg_starts_at_depot() {
        let store = store();
        let b = Coordinates { lat: 11.02, lng: 77.01 };
        let route = store.assign_stop(assign("B", Some(b))).await.unwrap();
        let expected = haversine_distance(&depot(), &b);
        assert!((route.stops[0].distance_from_previous_km - expected).abs() < 1e-9);
        assert!((route.total_distance_km - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_optimize_missing_route_is_empty_and_not_saved() {
        let store = store();
        let route = store.optimize(optimize_request()).await.unwrap();

        assert!(route.stops.is_empty());
        assert_eq!(route.total_distance_km, 0.0);
        assert_eq!(route.source, Some(RouteSource::Heuristic));
        assert_err!(store.get_route(key()).await);
    }

    #[tokio::test]
    async fn test_optimize_depot_scenario() {
        let store = scenario_store().await;
        let route = store.optimize(optimize_request()).await.unwrap();

        assert_eq!(bookings(&route), vec!["D", "B", "C"]);
        assert_eq!(route.source, Some(RouteSource::Heuristic));
        assert!(route.optimized_at.is_some());
        assert_eq!(route.version, 4);

        let legs: f64 = route.stops.iter().map(|s| s.distance_from_previous_km).sum();
        assert!((route.total_distance_km - legs).abs() < 1e-9);
        let orders: Vec<u32> = route.stops.iter().map(|s| s.sequence_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);

        let etas: Vec<_> = route.stops.iter().map(|s| s.estimated_arrival.unwrap()).collect();
        assert!(etas.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_optimize_is_idempotent() {
        let store = scenario_store().await;
        let first = store.optimize(optimize_request()).await.unwrap();
        let second = store.optimize(optimize_request()).await.unwrap();

        assert_eq!(bookings(&first), bookings(&second));
        assert_eq!(first.total_distance_km, second.total_distance_km);
        assert_eq!(second.version, first.version + 1);
    }

    fn list_path_km(route: &Route) -> f64 {
        let mut from = depot();
        let mut km = 0.0;
        for stop in route.stops.iter().filter(|s| s.status != StopStatus::Skipped) {
            if let Some(to) = stop.coordinate {
                km += haversine_distance(&from, &to);
                from = to;
            }
        }
        km
    }

    fn assert_legs_follow_list(route: &Route) {
        assert!((route.total_distance_km - list_path_km(route)).abs() < 1e-9);
        let mut at = route.start_time;
        for stop in &route.stops {
            let travel = Duration::milliseconds((stop.duration_from_previous_minutes * 60_000.0).round() as i64);
            let eta = stop.estimated_arrival.unwrap();
            assert!((eta - (at + travel)).num_seconds().abs() <= 1, "{} eta {}", stop.booking_ref, eta);
            at = eta + Duration::minutes(stop.service_duration_minutes as i64);
        }
    }

    #[tokio::test]
    async fn test_optimize_keeps_fixed_stops_in_place() {
        let store = scenario_store().await;
        let route = store.get_route(key()).await.unwrap();
        let c = route.stops[1].id;
        assert_ok!(store.update_stop_status(c, status(StopStatus::EnRoute, None)).await);

        let route = store.optimize(optimize_request()).await.unwrap();

        assert_eq!(route.stops[1].id, c);
        assert_eq!(route.stops[1].sequence_order, 2);
        assert_eq!(route.stops[1].status, StopStatus::EnRoute);
        // B is ahead of the started stop and stays; D is the only tail stop
        assert_eq!(bookings(&route), vec!["B", "C", "D"]);
        assert_legs_follow_list(&route);
    }

    #[tokio::test]
    async fn test_optimize_orders_tail_from_started_stop() {
        let store = scenario_store().await;
        let b = store.get_route(key()).await.unwrap().stops[0].id;
        assert_ok!(store.update_stop_status(b, status(StopStatus::EnRoute, None)).await);

        let route = store.optimize(optimize_request()).await.unwrap();

        assert_eq!(bookings(&route), vec!["B", "D", "C"]);
        let b_coord = route.stops[0].coordinate.unwrap();
        let d_coord = route.stops[1].coordinate.unwrap();
        assert!((route.stops[1].distance_from_previous_km - haversine_distance(&b_coord, &d_coord)).abs() < 1e-9);
        assert_legs_follow_list(&route);
    }

    #[tokio::test]
    async fn test_optimize_rejects_stale_version() {
        let store = scenario_store().await;
        let mut request = optimize_request();
        request.expected_version = Some(1);

        let err = store.optimize(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { expected: 1, actual: 3 }));
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let store = scenario_store().await;
        let stop = store.get_route(key()).await.unwrap().stops[0].id;

        let err = store
            .update_stop_status(stop, status(StopStatus::Completed, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        assert_ok!(store.update_stop_status(stop, status(StopStatus::EnRoute, None)).await);
        let err = store
            .update_stop_status(stop, status(StopStatus::Pending, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let err = store
            .update_stop_status(Uuid::from_u128(99), status(StopStatus::EnRoute, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STOP_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_late_arrival_shifts_later_stops() {
        let store = scenario_store().await;
        let before = store.optimize(optimize_request()).await.unwrap();
        let first = before.stops[0].id;
        let late = before.stops[0].estimated_arrival.unwrap() + Duration::minutes(15);

        assert_ok!(store.update_stop_status(first, status(StopStatus::EnRoute, None)).await);
        let after = store
            .update_stop_status(first, status(StopStatus::Arrived, Some(late)))
            .await
            .unwrap();

        assert_eq!(after.stops[0].actual_arrival, Some(late));
        assert_eq!(after.status(), RouteStatus::InProgress);
        for i in 1..after.stops.len() {
            let shift = after.stops[i].estimated_arrival.unwrap() - before.stops[i].estimated_arrival.unwrap();
            assert_eq!(shift, Duration::minutes(15));
            assert_eq!(after.stops[i].service_duration_minutes, before.stops[i].service_duration_minutes);
        }
    }

    #[tokio::test]
    async fn test_skip_drops_stop_from_totals() {
        let store = scenario_store().await;
        let before = store.optimize(optimize_request()).await.unwrap();
        let middle = before.stops[1].id;

        let after = store
            .update_stop_status(middle, status(StopStatus::Skipped, None))
            .await
            .unwrap();

        assert!(after.total_distance_km < before.total_distance_km);
        assert!(after.total_duration_minutes < before.total_duration_minutes);
        // the last stop no longer waits for the skipped one's service
        assert!(after.stops[2].estimated_arrival < before.stops[2].estimated_arrival);
        assert_eq!(after.stops[0].estimated_arrival, before.stops[0].estimated_arrival);
    }

    #[tokio::test]
    async fn test_route_completes_when_all_stops_terminal() {
        let store = store();
        let route = store.assign_stop(assign("BK-1", None)).await.unwrap();
        let stop = route.stops[0].id;
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        for next in [StopStatus::EnRoute, StopStatus::Arrived, StopStatus::Completed] {
            assert_ok!(store.update_stop_status(stop, status(next, Some(t))).await);
        }
        let route = store.get_route(key()).await.unwrap();
        assert_eq!(route.status(), RouteStatus::Completed);
        assert_eq!(route.stops[0].completed_at, Some(t));
    }

    #[tokio::test]
    async fn test_reorder_pending_stops() {
        let store = scenario_store().await;
        let route = store.get_route(key()).await.unwrap();
        let ids: Vec<Uuid> = route.stops.iter().rev().map(|s| s.id).collect();

        let reordered = store.reorder_stops(reorder(ids.clone())).await.unwrap();

        assert_eq!(reordered.stops.iter().map(|s| s.id).collect::<Vec<_>>(), ids);
        assert_eq!(bookings(&reordered), vec!["D", "C", "B"]);
        let d = reordered.stops[0].coordinate.unwrap();
        assert!((reordered.stops[0].distance_from_previous_km - haversine_distance(&depot(), &d)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reorder_cannot_move_started_stop() {
        let store = scenario_store().await;
        let route = store.get_route(key()).await.unwrap();
        let first = route.stops[0].id;
        assert_ok!(store.update_stop_status(first, status(StopStatus::EnRoute, None)).await);

        let ids: Vec<Uuid> = route.stops.iter().rev().map(|s| s.id).collect();
        let err = store.reorder_stops(reorder(ids)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_reorder_requires_permutation() {
        let store = scenario_store().await;
        let route = store.get_route(key()).await.unwrap();
        let first = route.stops[0].id;

        let err = store.reorder_stops(reorder(vec![first, first, first])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        let err = store.reorder_stops(reorder(vec![first])).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_concurrent_assignments_are_serialized() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.assign_stop(assign(&format!("BK-{}", i), None)).await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let route = store.get_route(key()).await.unwrap();
        assert_eq!(route.stops.len(), 16);
        assert_eq!(route.version, 16);
        assert!(store.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_route_locks_are_released() {
        let store = scenario_store().await;
        assert!(store.locks.lock().is_empty());

        // failed operations release their lock too
        assert_err!(store.reorder_stops(reorder(vec![Uuid::nil()])).await);
        let mut request = optimize_request();
        request.date = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert_ok!(store.optimize(request).await);
        assert!(store.locks.lock().is_empty());
    }
}
