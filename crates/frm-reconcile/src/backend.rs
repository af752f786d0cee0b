//! Route backend contract.
//!
//! [`RouteBackend`] is what the engine drives: insert/delete one route, full
//! sync against a desired map, or delete everything this manager owns.
//! [`RouteTable`] is the raw transport seam a cloud provider implements
//! (list/get/insert/delete by name). [`TableBackend`] layers naming and the
//! diff on top of any table, so providers never reimplement either.

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use frm_schemas::{DesiredRoutes, LiveRoute, NewRoute, Subnet};
use tracing::{debug, info};

use crate::naming::{route_name, route_name_prefix};
use crate::plan::plan_sync;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a route backend or table may return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// Network failure or a 5xx from the provider.
    Unavailable(String),
    /// The provider throttled the call.
    RateLimited(String),
    /// The named route does not exist.
    NotFound(String),
    /// A route with this name already exists.
    Conflict(String),
    /// Any other application-level error.
    Api { code: Option<u16>, message: String },
    /// A response could not be decoded.
    Decode(String),
}

impl BackendError {
    /// Worth retrying on the next pass without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::RateLimited(_))
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            BackendError::RateLimited(msg) => write!(f, "backend rate limited: {msg}"),
            BackendError::NotFound(name) => write!(f, "route not found: {name}"),
            BackendError::Conflict(name) => write!(f, "route already exists: {name}"),
            BackendError::Api {
                code: Some(c),
                message,
            } => write!(f, "backend api error code={c}: {message}"),
            BackendError::Api {
                code: None,
                message,
            } => write!(f, "backend api error: {message}"),
            BackendError::Decode(msg) => write!(f, "backend decode error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Raw route-table access for one network of one provider.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Provider name for logs (e.g. `"google"`).
    fn provider(&self) -> &'static str;

    /// Network identifier route names are derived from.
    fn network(&self) -> &str;

    /// Every route whose name starts with `name_prefix`.
    async fn list_routes(&self, name_prefix: &str) -> Result<Vec<LiveRoute>, BackendError>;

    async fn get_route(&self, name: &str) -> Result<Option<LiveRoute>, BackendError>;

    async fn insert_route(&self, route: &NewRoute) -> Result<(), BackendError>;

    /// Fails with [`BackendError::NotFound`] when `name` does not exist.
    async fn delete_route(&self, name: &str) -> Result<(), BackendError>;
}

/// What a full sync changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub deleted: Vec<String>,
    pub inserted: Vec<String>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.inserted.is_empty()
    }
}

/// Operations the reconciliation engine needs from a backend.
///
/// Object-safe so the engine can hold an `Arc<dyn RouteBackend>`.
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Make `subnet` route to `ip`, replacing any route already holding the
    /// subnet's name. A no-op when the route is already correct.
    async fn insert(&self, ip: Ipv4Addr, subnet: Subnet) -> Result<(), BackendError>;

    /// Remove the route for `subnet`. Succeeds when it is already absent.
    async fn delete(&self, subnet: Subnet) -> Result<(), BackendError>;

    /// Converge the live table onto `desired`. Stops at the first failure.
    async fn sync(&self, desired: &DesiredRoutes) -> Result<SyncOutcome, BackendError>;

    /// Remove every route this manager owns, returning the deleted names.
    async fn delete_all_routes(&self) -> Result<Vec<String>, BackendError>;
}

// ---------------------------------------------------------------------------
// TableBackend
// ---------------------------------------------------------------------------

/// [`RouteBackend`] over any [`RouteTable`].
#[derive(Debug)]
pub struct TableBackend<T> {
    table: T,
}

impl<T: RouteTable> TableBackend<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    async fn owned_routes(&self) -> Result<Vec<LiveRoute>, BackendError> {
        let prefix = route_name_prefix(self.table.network());
        let mut routes = self.table.list_routes(&prefix).await?;
        routes.retain(|r| r.name.starts_with(&prefix));
        Ok(routes)
    }

    async fn delete_tolerant(&self, name: &str) -> Result<bool, BackendError> {
        match self.table.delete_route(name).await {
            Ok(()) => Ok(true),
            Err(BackendError::NotFound(_)) => {
                debug!(route = name, "route already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T: RouteTable> RouteBackend for TableBackend<T> {
    async fn insert(&self, ip: Ipv4Addr, subnet: Subnet) -> Result<(), BackendError> {
        let name = route_name(self.table.network(), &subnet);
        match self.table.get_route(&name).await? {
            Some(existing) if existing.matches(ip, &subnet) => {
                debug!(route = %name, next_hop = %ip, "route already present");
                return Ok(());
            }
            Some(existing) => {
                info!(
                    route = %name,
                    old_next_hop = %existing.next_hop_ip,
                    next_hop = %ip,
                    "replacing route"
                );
                self.delete_tolerant(&name).await?;
            }
            None => {}
        }
        info!(route = %name, subnet = %subnet, next_hop = %ip, "insert route");
        self.table.insert_route(&NewRoute::new(name, subnet, ip)).await
    }

    async fn delete(&self, subnet: Subnet) -> Result<(), BackendError> {
        let name = route_name(self.table.network(), &subnet);
        if self.delete_tolerant(&name).await? {
            info!(route = %name, subnet = %subnet, "delete route");
        }
        Ok(())
    }

    async fn sync(&self, desired: &DesiredRoutes) -> Result<SyncOutcome, BackendError> {
        let live = self.owned_routes().await?;
        let plan = plan_sync(self.table.network(), desired, &live);
        let mut outcome = SyncOutcome::default();

        for stale in &plan.deletes {
            info!(
                route = %stale.name,
                dest = %stale.dest_range,
                next_hop = %stale.next_hop_ip,
                "delete route"
            );
            if self.delete_tolerant(&stale.name).await? {
                outcome.deleted.push(stale.name.clone());
            }
        }

        for route in &plan.inserts {
            info!(
                route = %route.name,
                subnet = %route.dest_range,
                next_hop = %route.next_hop_ip,
                "insert route"
            );
            self.table.insert_route(route).await?;
            outcome.inserted.push(route.name.clone());
        }

        Ok(outcome)
    }

    async fn delete_all_routes(&self) -> Result<Vec<String>, BackendError> {
        let mut deleted = Vec::new();
        for route in self.owned_routes().await? {
            if self.delete_tolerant(&route.name).await? {
                deleted.push(route.name);
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Unavailable("x".into()).is_transient());
        assert!(BackendError::RateLimited("x".into()).is_transient());
        assert!(!BackendError::NotFound("x".into()).is_transient());
        assert!(!BackendError::Decode("x".into()).is_transient());
    }

    #[test]
    fn display_api_with_code() {
        let err = BackendError::Api {
            code: Some(400),
            message: "invalid destRange".to_string(),
        };
        assert_eq!(err.to_string(), "backend api error code=400: invalid destRange");
    }

    #[test]
    fn backend_is_object_safe() {
        fn _takes(_b: std::sync::Arc<dyn RouteBackend>) {}
    }
}
