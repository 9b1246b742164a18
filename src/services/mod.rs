//! Business logic services

pub mod eta;
pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod route_store;
pub mod routing;
