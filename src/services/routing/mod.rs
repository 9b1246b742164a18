//! Stop ordering
//!
//! Two `RouteOrderingStrategy` implementations are chained by
//! [`RouteOptimizer`]: the mapping provider (road network, bounded by a
//! timeout) and the local nearest-neighbor heuristic, which never fails and
//! always ends the chain.

mod heuristic;
mod optimizer;
mod valhalla;

pub use heuristic::NearestNeighborOrdering;
pub use optimizer::RouteOptimizer;
pub use valhalla::{ValhallaClient, ValhallaConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ProviderOptimizeError;
use crate::types::{Coordinates, RouteSource};

/// Visiting order over a list of points, with the inbound leg of each visit
#[derive(Debug, Clone, PartialEq)]
pub struct LegPlan {
    /// Indices into the input points, in visiting order
    pub order: Vec<usize>,
    /// `leg_distances_km[k]` is the leg arriving at `order[k]`
    pub leg_distances_km: Vec<f64>,
    /// Travel minutes per leg when the strategy knows them
    pub leg_durations_minutes: Option<Vec<f64>>,
}

impl LegPlan {
    pub fn empty() -> Self {
        Self {
            order: Vec::new(),
            leg_distances_km: Vec::new(),
            leg_durations_minutes: None,
        }
    }

    /// Check that the plan visits each of `point_count` points exactly once
    pub fn validate(&self, point_count: usize) -> Result<(), ProviderOptimizeError> {
        if !is_permutation(&self.order, point_count) {
            return Err(ProviderOptimizeError::MalformedResponse(format!(
                "order {:?} is not a permutation of {} points",
                self.order, point_count
            )));
        }
        if self.leg_distances_km.len() != point_count {
            return Err(ProviderOptimizeError::MalformedResponse(format!(
                "expected {} legs, got {}",
                point_count,
                self.leg_distances_km.len()
            )));
        }
        let durations = self.leg_durations_minutes.as_deref().unwrap_or(&[]);
        if self.leg_durations_minutes.is_some() && durations.len() != point_count {
            return Err(ProviderOptimizeError::MalformedResponse(format!(
                "expected {} leg durations, got {}",
                point_count,
                durations.len()
            )));
        }
        let finite = |v: &f64| v.is_finite() && *v >= 0.0;
        if !self.leg_distances_km.iter().all(finite) || !durations.iter().all(finite) {
            return Err(ProviderOptimizeError::MalformedResponse(
                "negative or non-finite leg value".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &i in order {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// A way of ordering coordinate-bearing stops
#[async_trait]
pub trait RouteOrderingStrategy: Send + Sync {
    /// Order `points` for a path starting at `origin` (not a closed tour)
    async fn order(&self, origin: Coordinates, points: &[Coordinates]) -> Result<LegPlan, ProviderOptimizeError>;

    /// Recorded on the route when this strategy's plan is used
    fn source(&self) -> RouteSource;

    /// Get strategy name for logging
    fn name(&self) -> &str;
}

/// Result of a mapping provider's waypoint optimization
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    /// Permutation of the waypoint indices
    pub ordered_waypoint_indices: Vec<usize>,
    /// origin -> first waypoint, ..., last waypoint -> destination
    pub per_leg_distance_meters: Vec<f64>,
    pub per_leg_duration_seconds: Vec<f64>,
}

impl ProviderRoute {
    pub fn validate(&self, waypoint_count: usize) -> Result<(), ProviderOptimizeError> {
        if !is_permutation(&self.ordered_waypoint_indices, waypoint_count) {
            return Err(ProviderOptimizeError::MalformedResponse(format!(
                "waypoint order {:?} is not a permutation of {} waypoints",
                self.ordered_waypoint_indices, waypoint_count
            )));
        }
        let legs = waypoint_count + 1;
        if self.per_leg_distance_meters.len() != legs || self.per_leg_duration_seconds.len() != legs {
            return Err(ProviderOptimizeError::MalformedResponse(format!(
                "expected {} legs, got {} distances and {} durations",
                legs,
                self.per_leg_distance_meters.len(),
                self.per_leg_duration_seconds.len()
            )));
        }
        Ok(())
    }
}

/// External road-network service that reorders waypoints between fixed ends
#[async_trait]
pub trait MappingProvider: Send + Sync {
    async fn optimize_route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
    ) -> Result<ProviderRoute, ProviderOptimizeError>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Provider-backed ordering: the last point is the destination and the rest
/// are waypoints the provider may reorder
pub struct ProviderOrdering {
    provider: Arc<dyn MappingProvider>,
    timeout: Duration,
}

impl ProviderOrdering {
    pub fn new(provider: Arc<dyn MappingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl RouteOrderingStrategy for ProviderOrdering {
    async fn order(&self, origin: Coordinates, points: &[Coordinates]) -> Result<LegPlan, ProviderOptimizeError> {
        let Some((destination, waypoints)) = points.split_last() else {
            return Ok(LegPlan::empty());
        };

        debug!(
            "Requesting {} waypoint optimization from {}",
            waypoints.len(),
            self.provider.name()
        );

        let call = self.provider.optimize_route(origin, *destination, waypoints);
        let route = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ProviderOptimizeError::Timeout(self.timeout))??;
        route.validate(waypoints.len())?;

        let mut order = route.ordered_waypoint_indices;
        order.push(points.len() - 1);

        Ok(LegPlan {
            order,
            leg_distances_km: route.per_leg_distance_meters.iter().map(|m| m / 1000.0).collect(),
            leg_durations_minutes: Some(route.per_leg_duration_seconds.iter().map(|s| s / 60.0).collect()),
        })
    }

    fn source(&self) -> RouteSource {
        RouteSource::Provider
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Create the optimizer: provider first when configured, heuristic always
pub fn create_route_optimizer(
    valhalla: Option<ValhallaConfig>,
    speed_kmh: f64,
) -> Result<RouteOptimizer, ProviderOptimizeError> {
    let mut optimizer = RouteOptimizer::new(speed_kmh);
    match valhalla {
        Some(config) => {
            info!("Mapping provider configured at {}", config.base_url);
            let timeout = config.timeout;
            let client = ValhallaClient::new(config)?;
            optimizer = optimizer.with_strategy(Arc::new(ProviderOrdering::new(Arc::new(client), timeout)));
        }
        None => info!("No mapping provider configured, using nearest-neighbor ordering"),
    }
    Ok(optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> Coordinates {
        Coordinates { lat, lng }
    }

    /// Reverses the waypoints and reports 1 km / 2 min per leg
    struct ReversingProvider;

    #[async_trait]
    impl MappingProvider for ReversingProvider {
        async fn optimize_route(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
            waypoints: &[Coordinates],
        ) -> Result<ProviderRoute, ProviderOptimizeError> {
            let legs = waypoints.len() + 1;
            Ok(ProviderRoute {
                ordered_waypoint_indices: (0..waypoints.len()).rev().collect(),
                per_leg_distance_meters: vec![1000.0; legs],
                per_leg_duration_seconds: vec![120.0; legs],
            })
        }

        fn name(&self) -> &str {
            "reversing"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl MappingProvider for SlowProvider {
        async fn optimize_route(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
            _waypoints: &[Coordinates],
        ) -> Result<ProviderRoute, ProviderOptimizeError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(ProviderOptimizeError::NotConfigured)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[2, 0, 1], 3));
        assert!(is_permutation(&[], 0));
        assert!(!is_permutation(&[0, 0, 1], 3));
        assert!(!is_permutation(&[0, 3, 1], 3));
        assert!(!is_permutation(&[0, 1], 3));
    }

    #[test]
    fn provider_route_rejects_wrong_leg_count() {
        let route = ProviderRoute {
            ordered_waypoint_indices: vec![1, 0],
            per_leg_distance_meters: vec![1.0, 2.0],
            per_leg_duration_seconds: vec![1.0, 2.0, 3.0],
        };
        assert!(matches!(
            route.validate(2),
            Err(ProviderOptimizeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn provider_ordering_keeps_destination_last() {
        let strategy = ProviderOrdering::new(Arc::new(ReversingProvider), Duration::from_secs(1));
        let points = vec![point(1.0, 1.0), point(2.0, 2.0), point(3.0, 3.0)];

        let plan = strategy.order(point(0.0, 0.0), &points).await.unwrap();

        assert_eq!(plan.order, vec![1, 0, 2]);
        assert_eq!(plan.leg_distances_km, vec![1.0, 1.0, 1.0]);
        assert_eq!(plan.leg_durations_minutes, Some(vec![2.0, 2.0, 2.0]));
        assert!(plan.validate(points.len()).is_ok());
    }

    #[tokio::test]
    async fn provider_ordering_times_out() {
        let strategy = ProviderOrdering::new(Arc::new(SlowProvider), Duration::from_millis(50));
        let points = vec![point(1.0, 1.0)];

        let started = std::time::Instant::now();
        let result = strategy.order(point(0.0, 0.0), &points).await;

        assert!(matches!(result, Err(ProviderOptimizeError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn create_without_provider_is_heuristic_only() {
        let optimizer = create_route_optimizer(None, 30.0).unwrap();
        assert_eq!(optimizer.strategy_names(), vec!["nearest-neighbor"]);
    }
}
