//! Geocoding abstraction layer with safety features
//!
//! - `MockGeocoder` for tests and development (deterministic, no network)
//! - `RateLimitedNominatimGeocoder` for production (rate limit + circuit breaker)
//!
//! Geocoding is best-effort. Callers treat every `GeocodeError` as a warning
//! and keep the stop without a coordinate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::{GeocoderBackend, GeocoderConfig};
use crate::error::GeocodeError;
use crate::services::nominatim::NominatimClient;
use crate::types::Coordinates;

/// Geocoder trait - abstraction for all geocoding implementations
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-form address to coordinates
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError>;

    /// Resolve coordinates to a display address
    async fn reverse_geocode(&self, coords: &Coordinates) -> Result<String, GeocodeError>;

    /// Get the name of this geocoder implementation
    fn name(&self) -> &'static str;
}

// ==========================================================================
// MockGeocoder Implementation
// ==========================================================================

/// Mock geocoder - returns deterministic fake coordinates
pub struct MockGeocoder {
    center: Coordinates,
    span_deg: f64,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::around(Coordinates { lat: 50.08, lng: 14.43 }, 0.25)
    }

    /// Coordinates land inside `center ± span_deg` on both axes
    pub fn around(center: Coordinates, span_deg: f64) -> Self {
        Self { center, span_deg }
    }

    fn hash_to_coordinates(&self, address: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        address.trim().to_lowercase().hash(&mut hasher);
        let hash = hasher.finish();

        // Upper and lower halves of the hash drive lat and lng independently
        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFF_FFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: (self.center.lat + (lat_normalized * 2.0 - 1.0) * self.span_deg).clamp(-90.0, 90.0),
            lng: (self.center.lng + (lng_normalized * 2.0 - 1.0) * self.span_deg).clamp(-180.0, 180.0),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::NotFound);
        }
        Ok(self.hash_to_coordinates(address))
    }

    async fn reverse_geocode(&self, coords: &Coordinates) -> Result<String, GeocodeError> {
        Ok(format!("Mock address near {:.5}, {:.5}", coords.lat, coords.lng))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// RateLimiter Implementation
// ==========================================================================

/// Enforces a minimum interval between calls. Waiters queue on the lock.
pub struct RateLimiter {
    last_call: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: parking_lot::Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: parking_lot::Mutex::new(None),
            recovery_time,
        }
    }

    /// Open means calls are rejected; half-open after `recovery_time`
    pub fn is_open(&self) -> bool {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Resets the failure count
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder Implementation
// ==========================================================================

/// Nominatim geocoder with rate limiting and circuit breaker protection
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn with_config(config: &GeocoderConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: NominatimClient::new(&config.nominatim_url, config.request_timeout)?,
            rate_limiter: RateLimiter::new(config.rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_recovery,
            ),
        })
    }

    /// Misses are answers, not failures; only transport-level problems trip the breaker
    fn record<T>(&self, result: &Result<T, GeocodeError>) {
        match result {
            Ok(_) | Err(GeocodeError::NotFound) => self.circuit_breaker.record_success(),
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!("Geocoding failed: {}", e);
            }
        }
    }

    fn guard(&self) -> Result<(), GeocodeError> {
        if self.circuit_breaker.is_open() {
            tracing::warn!("Circuit breaker is open, rejecting geocoding request");
            return Err(GeocodeError::ProviderUnavailable("circuit breaker open".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        self.guard()?;
        self.rate_limiter.wait().await;

        let result = self.client.geocode(address).await;
        self.record(&result);
        result
    }

    async fn reverse_geocode(&self, coords: &Coordinates) -> Result<String, GeocodeError> {
        self.guard()?;
        self.rate_limiter.wait().await;

        let result = self.client.reverse_geocode(coords).await;
        self.record(&result);
        result
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create the geocoder selected by configuration
pub fn create_geocoder(config: &GeocoderConfig) -> anyhow::Result<Arc<dyn Geocoder>> {
    match config.backend {
        GeocoderBackend::Mock => {
            tracing::info!("Using MockGeocoder");
            let geocoder = match config.mock_center {
                Some(center) => MockGeocoder::around(center, 0.25),
                None => MockGeocoder::new(),
            };
            Ok(Arc::new(geocoder))
        }
        GeocoderBackend::Nominatim => {
            tracing::info!("Using RateLimitedNominatimGeocoder at {}", config.nominatim_url);
            Ok(Arc::new(RateLimitedNominatimGeocoder::with_config(config)?))
        }
    }
}
