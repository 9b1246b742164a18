//! Route persistence

pub mod route;

pub use route::{InMemoryRouteRepository, RouteRepository};
