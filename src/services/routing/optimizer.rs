//! Route optimizer: runs the ordering chain over a day's stops

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{LegPlan, NearestNeighborOrdering, RouteOrderingStrategy};
use crate::services::geo::travel_minutes;
use crate::types::{Coordinates, RouteSource, RouteWarning, Stop};

/// Ordered stops with their totals
#[derive(Debug, Clone)]
pub struct OptimizedRoute {
    pub ordered_stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: u32,
    pub source: RouteSource,
    pub warnings: Vec<RouteWarning>,
}

pub struct RouteOptimizer {
    chain: Vec<Arc<dyn RouteOrderingStrategy>>,
    fallback: NearestNeighborOrdering,
    speed_kmh: f64,
}

impl RouteOptimizer {
    /// Optimizer with only the nearest-neighbor heuristic
    pub fn new(speed_kmh: f64) -> Self {
        Self {
            chain: Vec::new(),
            fallback: NearestNeighborOrdering,
            speed_kmh,
        }
    }

    /// Append a strategy tried before the heuristic
    pub fn with_strategy(mut self, strategy: Arc<dyn RouteOrderingStrategy>) -> Self {
        self.chain.push(strategy);
        self
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    /// Strategy names in the order they are tried
    pub fn strategy_names(&self) -> Vec<&str> {
        self.chain
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    /// Order `stops` starting from `origin`.
    ///
    /// Stops without coordinates keep their relative order after all located
    /// stops and are flagged `unoptimized`. With no origin the first located
    /// stop is used. Never fails: a failing strategy hands over to the next
    /// one and the heuristic always produces a plan.
    pub async fn optimize(&self, origin: Option<Coordinates>, stops: Vec<Stop>) -> OptimizedRoute {
        let (located, unlocated): (Vec<Stop>, Vec<Stop>) = stops.into_iter().partition(|s| s.coordinate.is_some());
        let points: Vec<Coordinates> = located.iter().filter_map(|s| s.coordinate).collect();
        let origin = origin.or_else(|| points.first().copied());

        let mut warnings = Vec::new();
        let (plan, source) = match origin {
            Some(origin) if !points.is_empty() => self.run_chain(origin, &points, &mut warnings).await,
            _ => (LegPlan::empty(), self.fallback.source()),
        };

        let mut slots: Vec<Option<Stop>> = located.into_iter().map(Some).collect();
        let mut ordered_stops = Vec::with_capacity(slots.len() + unlocated.len());
        let mut total_distance_km = 0.0;
        let mut travel = 0.0;
        let mut service = 0u32;

        for (k, &idx) in plan.order.iter().enumerate() {
            let Some(mut stop) = slots.get_mut(idx).and_then(Option::take) else {
                continue;
            };
            let km = plan.leg_distances_km[k];
            let minutes = plan
                .leg_durations_minutes
                .as_ref()
                .map(|d| d[k])
                .unwrap_or_else(|| travel_minutes(km, self.speed_kmh));

            stop.distance_from_previous_km = km;
            stop.duration_from_previous_minutes = minutes;
            stop.unoptimized = false;
            total_distance_km += km;
            travel += minutes;
            service += stop.service_duration_minutes;
            ordered_stops.push(stop);
        }

        for mut stop in unlocated {
            stop.distance_from_previous_km = 0.0;
            stop.duration_from_previous_minutes = 0.0;
            stop.unoptimized = true;
            service += stop.service_duration_minutes;
            warnings.push(RouteWarning::new(
                Some(stop.id),
                "MISSING_COORDINATE",
                format!("Stop {} has no coordinates, placed at the end", stop.booking_ref),
            ));
            ordered_stops.push(stop);
        }

        for (i, stop) in ordered_stops.iter_mut().enumerate() {
            stop.sequence_order = (i + 1) as u32;
        }

        info!(
            "Route optimized: {} stops, {:.1} km, source={}",
            ordered_stops.len(),
            total_distance_km,
            source.as_str()
        );

        OptimizedRoute {
            ordered_stops,
            total_distance_km,
            total_duration_minutes: travel.round() as u32 + service,
            source,
            warnings,
        }
    }

    async fn run_chain(
        &self,
        origin: Coordinates,
        points: &[Coordinates],
        warnings: &mut Vec<RouteWarning>,
    ) -> (LegPlan, RouteSource) {
        for strategy in &self.chain {
            let result = strategy.order(origin, points).await;
            match result.and_then(|plan| plan.validate(points.len()).map(|_| plan)) {
                Ok(plan) => {
                    debug!("{} ordered {} stops", strategy.name(), points.len());
                    return (plan, strategy.source());
                }
                Err(e) => {
                    warn!("{} failed, falling back: {}", strategy.name(), e);
                    warnings.push(RouteWarning::new(
                        None,
                        "PROVIDER_FALLBACK",
                        format!("{} unavailable ({}), used nearest-neighbor ordering", strategy.name(), e),
                    ));
                }
            }
        }
        (self.fallback.plan(origin, points), self.fallback.source())
    }
}
