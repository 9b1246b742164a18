//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/optimized/api-reference/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MappingProvider, ProviderRoute};
use crate::error::ProviderOptimizeError;
use crate::types::Coordinates;

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Sent as `api_key` query parameter when set
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: crate::defaults::MAX_PROVIDER_TIMEOUT,
        }
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self, ProviderOptimizeError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match &self.config.api_key {
            Some(key) => format!("{}/optimized_route?api_key={}", base, urlencoding::encode(key)),
            None => format!("{}/optimized_route", base),
        }
    }

    /// Build the optimized_route request: origin, waypoints, destination
    fn build_request(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
    ) -> OptimizedRouteRequest {
        let locations = std::iter::once(&origin)
            .chain(waypoints)
            .chain(std::iter::once(&destination))
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // geocoded points are often building centroids off the road edge
                radius: Some(500),
            })
            .collect();

        OptimizedRouteRequest {
            locations,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            directions_type: "none".to_string(),
        }
    }
}

/// Map a Valhalla trip back onto waypoint indices.
///
/// Valhalla echoes every location with its `original_index`; the first and
/// last are the fixed origin and destination.
fn parse_trip(trip: Trip, waypoint_count: usize) -> Result<ProviderRoute, ProviderOptimizeError> {
    let expected = waypoint_count + 2;
    if trip.locations.len() != expected {
        return Err(ProviderOptimizeError::MalformedResponse(format!(
            "expected {} locations, got {}",
            expected,
            trip.locations.len()
        )));
    }

    let ordered_waypoint_indices = trip.locations[1..expected - 1]
        .iter()
        .map(|loc| match loc.original_index {
            Some(i) if (1..=waypoint_count).contains(&i) => Ok(i - 1),
            other => Err(ProviderOptimizeError::MalformedResponse(format!(
                "waypoint slot has original_index {:?}",
                other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let route = ProviderRoute {
        ordered_waypoint_indices,
        per_leg_distance_meters: trip.legs.iter().map(|l| l.summary.length * 1000.0).collect(),
        per_leg_duration_seconds: trip.legs.iter().map(|l| l.summary.time).collect(),
    };
    route.validate(waypoint_count)?;
    Ok(route)
}

#[async_trait]
impl MappingProvider for ValhallaClient {
    async fn optimize_route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
    ) -> Result<ProviderRoute, ProviderOptimizeError> {
        let request = self.build_request(origin, destination, waypoints);

        debug!("Requesting optimized route from Valhalla for {} waypoints", waypoints.len());

        let response = self.client.post(self.endpoint()).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Valhalla returned error {}: {}", status, body);
            return Err(ProviderOptimizeError::Status { status, body });
        }

        let parsed: OptimizedRouteResponse = response
            .json()
            .await
            .map_err(|e| ProviderOptimizeError::MalformedResponse(e.to_string()))?;

        parse_trip(parsed.trip, waypoints.len())
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct OptimizedRouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    directions_type: String,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OptimizedRouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    locations: Vec<TripLocation>,
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct TripLocation {
    original_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    summary: LegSummary,
}

#[derive(Debug, Deserialize)]
struct LegSummary {
    /// Kilometers (units="kilometers")
    length: f64,
    /// Seconds
    time: f64,
}
