//! Configuration management

use std::time::Duration;

use anyhow::{self, Context, Result};
use chrono::NaiveTime;

use crate::defaults::{
    default_work_start, DEFAULT_AVERAGE_SPEED_KMH, DEFAULT_BIND_ADDR,
    DEFAULT_SERVICE_DURATION_MINUTES, MAX_PROVIDER_TIMEOUT,
};
use crate::services::routing::ValhallaConfig;
use crate::types::Coordinates;

/// Default rate limit interval (1.5 seconds - Nominatim allows 1 req/s)
const DEFAULT_RATE_LIMIT_MS: u64 = 1500;

/// Default circuit breaker threshold (3 failures)
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default circuit breaker recovery time (5 minutes)
const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocoderBackend {
    Mock,
    Nominatim,
}

/// Geocoder selection and Nominatim protection settings
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub backend: GeocoderBackend,
    pub nominatim_url: String,
    pub request_timeout: Duration,
    pub rate_limit_interval: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_recovery: Duration,
    /// Where the mock geocoder scatters addresses
    pub mock_center: Option<Coordinates>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            backend: GeocoderBackend::Mock,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            request_timeout: Duration::from_secs(10),
            rate_limit_interval: Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_recovery: Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
            mock_center: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: String,

    /// Mapping provider (None = heuristic ordering only)
    pub valhalla: Option<ValhallaConfig>,

    /// Average travel speed for ETAs and heuristic durations
    pub average_speed_kmh: f64,

    /// Default route origin
    pub depot: Option<Coordinates>,

    /// Local (UTC) time a route's ETA chain starts when not given explicitly
    pub workday_start: NaiveTime,

    pub default_service_minutes: u32,

    pub geocoder: GeocoderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            valhalla: None,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            depot: None,
            workday_start: default_work_start(),
            default_service_minutes: DEFAULT_SERVICE_DURATION_MINUTES,
            geocoder: GeocoderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = lookup("BIND_ADDR").unwrap_or(defaults.bind_addr);

        let provider_timeout = match lookup("PROVIDER_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse().with_context(|| format!("PROVIDER_TIMEOUT_MS is not a number: {raw}"))?,
            ),
            None => MAX_PROVIDER_TIMEOUT,
        };
        if provider_timeout > MAX_PROVIDER_TIMEOUT {
            tracing::warn!(
                "PROVIDER_TIMEOUT_MS {:?} exceeds {:?}, clamping",
                provider_timeout,
                MAX_PROVIDER_TIMEOUT
            );
        }

        let valhalla = lookup("VALHALLA_URL").filter(|url| !url.is_empty()).map(|url| ValhallaConfig {
            api_key: lookup("MAPPING_API_KEY").filter(|key| !key.is_empty()),
            timeout: provider_timeout.min(MAX_PROVIDER_TIMEOUT),
            ..ValhallaConfig::new(url)
        });

        let average_speed_kmh = match lookup("AVERAGE_SPEED_KMH") {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("AVERAGE_SPEED_KMH is not a number: {raw}"))?,
            None => defaults.average_speed_kmh,
        };
        if !(average_speed_kmh > 0.0) {
            anyhow::bail!("AVERAGE_SPEED_KMH must be positive (got {})", average_speed_kmh);
        }

        let depot = match (lookup("DEPOT_LAT"), lookup("DEPOT_LNG")) {
            (Some(lat), Some(lng)) => {
                let lat: f64 = lat.parse().context("DEPOT_LAT is not a number")?;
                let lng: f64 = lng.parse().context("DEPOT_LNG is not a number")?;
                Some(Coordinates::new(lat, lng).context("DEPOT_LAT/DEPOT_LNG out of range")?)
            }
            (None, None) => None,
            _ => anyhow::bail!("DEPOT_LAT and DEPOT_LNG must be set together"),
        };

        let workday_start = match lookup("WORKDAY_START") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
                .with_context(|| format!("WORKDAY_START must be HH:MM (got {raw})"))?,
            None => defaults.workday_start,
        };

        let default_service_minutes = match lookup("DEFAULT_SERVICE_MINUTES") {
            Some(raw) => raw.parse().context("DEFAULT_SERVICE_MINUTES is not a number")?,
            None => defaults.default_service_minutes,
        };

        let backend = match lookup("GEOCODER_BACKEND").as_deref() {
            None | Some("mock") => GeocoderBackend::Mock,
            Some("nominatim") => GeocoderBackend::Nominatim,
            Some(other) => {
                tracing::warn!("Unknown GEOCODER_BACKEND '{}', using mock", other);
                GeocoderBackend::Mock
            }
        };

        let geocoder_defaults = GeocoderConfig::default();
        let geocoder = GeocoderConfig {
            backend,
            nominatim_url: lookup("NOMINATIM_URL").unwrap_or(geocoder_defaults.nominatim_url),
            request_timeout: geocoder_defaults.request_timeout,
            rate_limit_interval: lookup("NOMINATIM_RATE_LIMIT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(geocoder_defaults.rate_limit_interval),
            circuit_breaker_threshold: lookup("NOMINATIM_CB_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(geocoder_defaults.circuit_breaker_threshold),
            circuit_breaker_recovery: lookup("NOMINATIM_CB_RECOVERY_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(geocoder_defaults.circuit_breaker_recovery),
            mock_center: depot,
        };

        Ok(Self {
            bind_addr,
            valhalla,
            average_speed_kmh,
            depot,
            workday_start,
            default_service_minutes,
            geocoder,
        })
    }
}
