//! Nearest-neighbor ordering

use async_trait::async_trait;

use super::{LegPlan, RouteOrderingStrategy};
use crate::defaults::DISTANCE_TIE_EPSILON_KM;
use crate::error::ProviderOptimizeError;
use crate::services::geo::haversine_distance;
use crate::types::{Coordinates, RouteSource};

/// Greedy open-path ordering by great-circle distance. Never fails, needs no
/// network, and is deterministic for a given input order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborOrdering;

impl NearestNeighborOrdering {
    /// Visit the closest unvisited point from the current position until none
    /// are left. Ties go to the lower input index.
    pub fn plan(&self, origin: Coordinates, points: &[Coordinates]) -> LegPlan {
        let n = points.len();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut legs = Vec::with_capacity(n);
        let mut current = origin;

        for _ in 0..n {
            let mut best: Option<(usize, f64)> = None;

            for (j, candidate) in points.iter().enumerate() {
                if visited[j] {
                    continue;
                }
                let dist = haversine_distance(&current, candidate);
                match best {
                    Some((_, best_dist)) if dist >= best_dist - DISTANCE_TIE_EPSILON_KM => {}
                    _ => best = Some((j, dist)),
                }
            }

            if let Some((next, dist)) = best {
                visited[next] = true;
                order.push(next);
                legs.push(dist);
                current = points[next];
            }
        }

        LegPlan {
            order,
            leg_distances_km: legs,
            leg_durations_minutes: None,
        }
    }
}

#[async_trait]
impl RouteOrderingStrategy for NearestNeighborOrdering {
    async fn order(&self, origin: Coordinates, points: &[Coordinates]) -> Result<LegPlan, ProviderOptimizeError> {
        Ok(self.plan(origin, points))
    }

    fn source(&self) -> RouteSource {
        RouteSource::Heuristic
    }

    fn name(&self) -> &str {
        "nearest-neighbor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> Coordinates {
        Coordinates { lat, lng }
    }

    fn depot_a() -> Coordinates {
        point(11.00, 77.00)
    }

    /// B, C, D of the depot scenario, in that input order
    fn scenario_points() -> Vec<Coordinates> {
        vec![point(11.02, 77.01), point(11.10, 77.20), point(11.01, 77.02)]
    }

    #[test]
    fn test_empty_input() {
        let plan = NearestNeighborOrdering.plan(depot_a(), &[]);
        assert!(plan.order.is_empty());
        assert!(plan.leg_distances_km.is_empty());
    }

    #[test]
    fn test_single_point_at_origin_has_zero_leg() {
        let plan = NearestNeighborOrdering.plan(depot_a(), &[depot_a()]);
        assert_eq!(plan.order, vec![0]);
        assert_eq!(plan.leg_distances_km, vec![0.0]);
    }

    #[test]
    fn test_depot_scenario_order() {
        let points = scenario_points();
        let plan = NearestNeighborOrdering.plan(depot_a(), &points);

        // D is ~2.45 km from A, B ~2.48 km, so D goes first
        assert_eq!(plan.order, vec![2, 0, 1]);

        let expected = haversine_distance(&depot_a(), &points[2])
            + haversine_distance(&points[2], &points[0])
            + haversine_distance(&points[0], &points[1]);
        let total: f64 = plan.leg_distances_km.iter().sum();
        assert!((total - expected).abs() < 1e-9);
    }

    #[test]
    fn test_depot_scenario_from_b() {
        let points = scenario_points();
        let plan = NearestNeighborOrdering.plan(points[0], &points);
        // B itself (0 km), then D, then C
        assert_eq!(plan.order, vec![0, 2, 1]);
        assert_eq!(plan.leg_distances_km[0], 0.0);
    }

    #[test]
    fn test_ties_go_to_lower_index() {
        let same = point(50.1, 14.4);
        let plan = NearestNeighborOrdering.plan(point(50.0, 14.4), &[same, same, same]);
        assert_eq!(plan.order, vec![0, 1, 2]);
    }

    #[test]
    fn test_visits_every_point_once_and_is_deterministic() {
        let points: Vec<Coordinates> = (0..15)
            .map(|i| point(49.0 + (i * 7 % 11) as f64 * 0.03, 16.0 + (i * 5 % 13) as f64 * 0.02))
            .collect();

        let first = NearestNeighborOrdering.plan(point(49.2, 16.1), &points);
        let second = NearestNeighborOrdering.plan(point(49.2, 16.1), &points);

        assert_eq!(first, second);
        assert!(first.validate(points.len()).is_ok());
    }
}
