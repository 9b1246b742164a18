use std::time::Duration;

use chrono::NaiveTime;

pub const DEFAULT_SERVICE_DURATION_MINUTES: u32 = 30;

pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 30.0;

/// Upper bound on any single mapping provider call
pub const MAX_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Stops closer than this are treated as equidistant by the heuristic
pub const DISTANCE_TIE_EPSILON_KM: f64 = 1e-6;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

pub const DEFAULT_LOGS_DIR: &str = "./logs";

pub fn default_work_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).expect("valid static default work start")
}
