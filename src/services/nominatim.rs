//! Nominatim geocoding client

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::GeocodeError;
use crate::types::Coordinates;

/// Nominatim search response item
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// Nominatim reverse response; `error` is set instead of a body on misses
#[derive(Debug, Deserialize)]
pub struct NominatimReverseResult {
    pub display_name: Option<String>,
    pub error: Option<String>,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("route-dispatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Geocode a free-form address to coordinates
    pub async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        let url = format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(address)
        );

        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        check_status(response.status())?;

        let results: Vec<NominatimResult> = response.json().await.map_err(unavailable)?;

        let result = results.first().ok_or(GeocodeError::NotFound)?;
        let lat: f64 = result
            .lat
            .parse()
            .map_err(|_| GeocodeError::ProviderUnavailable(format!("invalid latitude {}", result.lat)))?;
        let lng: f64 = result
            .lon
            .parse()
            .map_err(|_| GeocodeError::ProviderUnavailable(format!("invalid longitude {}", result.lon)))?;

        let coords = Coordinates { lat, lng };
        if !coords.is_valid() {
            return Err(GeocodeError::ProviderUnavailable(format!(
                "coordinate out of range for {}",
                result.display_name
            )));
        }

        debug!("Geocoded '{}' to {:.6},{:.6}", address, lat, lng);
        Ok(coords)
    }

    /// Reverse geocode coordinates to a display address
    pub async fn reverse_geocode(&self, coords: &Coordinates) -> Result<String, GeocodeError> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=json",
            self.base_url, coords.lat, coords.lng
        );

        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        check_status(response.status())?;

        let result: NominatimReverseResult = response.json().await.map_err(unavailable)?;

        if let Some(reason) = &result.error {
            debug!("Reverse geocode miss at {:.6},{:.6}: {}", coords.lat, coords.lng, reason);
        }
        result.display_name.ok_or(GeocodeError::NotFound)
    }
}

fn check_status(status: StatusCode) -> Result<(), GeocodeError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }
    if !status.is_success() {
        return Err(GeocodeError::ProviderUnavailable(format!("HTTP {}", status)));
    }
    Ok(())
}

fn unavailable(err: reqwest::Error) -> GeocodeError {
    GeocodeError::ProviderUnavailable(err.to_string())
}
