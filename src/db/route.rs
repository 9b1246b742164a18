//! Route repository

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::DispatchError;
use crate::types::{Route, RouteKey};

/// Storage for one route per (worker, date) with compare-and-swap writes
#[async_trait]
pub trait RouteRepository: Send + Sync {
    async fn get(&self, key: &RouteKey) -> Result<Option<Route>, DispatchError>;

    /// Store `route` if the stored version still equals `expected_version`.
    ///
    /// `expected_version == 0` means "create": it fails when a route already
    /// exists for the key. Returns the stored route with its new version.
    async fn save(&self, route: Route, expected_version: u64) -> Result<Route, DispatchError>;
}

/// Process-local repository
#[derive(Default)]
pub struct InMemoryRouteRepository {
    routes: RwLock<HashMap<RouteKey, Route>>,
}

impl InMemoryRouteRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteRepository for InMemoryRouteRepository {
    async fn get(&self, key: &RouteKey) -> Result<Option<Route>, DispatchError> {
        Ok(self.routes.read().get(key).cloned())
    }

    async fn save(&self, mut route: Route, expected_version: u64) -> Result<Route, DispatchError> {
        let key = route.key();
        let mut routes = self.routes.write();

        let actual = routes.get(&key).map(|r| r.version).unwrap_or(0);
        if actual != expected_version {
            return Err(DispatchError::Conflict {
                expected: expected_version,
                actual,
            });
        }

        route.version = expected_version + 1;
        routes.insert(key, route.clone());
        debug!("Saved route {} at version {} ({} routes held)", key, route.version, routes.len());
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn new_route() -> Route {
        let key = RouteKey::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        Route::new(key, Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = InMemoryRouteRepository::new();
        let route = new_route();
        let key = route.key();

        assert!(repo.get(&key).await.unwrap().is_none());
        let saved = repo.save(route, 0).await.unwrap();

        assert_eq!(saved.version, 1);
        assert_eq!(repo.get(&key).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let repo = InMemoryRouteRepository::new();
        let route = new_route();
        repo.save(route.clone(), 0).await.unwrap();

        let err = repo.save(route, 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { expected: 0, actual: 1 }));
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let repo = InMemoryRouteRepository::new();
        let v1 = repo.save(new_route(), 0).await.unwrap();
        let v2 = repo.save(v1.clone(), 1).await.unwrap();
        assert_eq!(v2.version, 2);

        // a writer still holding v1
        let err = repo.save(v1, 1).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(repo.get(&v2.key()).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_routes_are_isolated_by_key() {
        let repo = InMemoryRouteRepository::new();
        let first = repo.save(new_route(), 0).await.unwrap();
        let second = repo.save(new_route(), 0).await.unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(repo.get(&first.key()).await.unwrap(), Some(first));
        assert_eq!(repo.get(&second.key()).await.unwrap(), Some(second));
    }
}
