//! frm-reconcile
//!
//! Desired-vs-live route reconciliation.
//!
//! - `naming`: route identity is a pure function of `(network, subnet)`.
//! - `plan`: the full-sync diff. Deterministic, pure logic. No IO.
//! - `backend`: the route-backend contract the engine drives, plus
//!   [`TableBackend`], which implements it on top of any raw [`RouteTable`].

mod backend;
mod naming;
mod plan;

pub use backend::{BackendError, RouteBackend, RouteTable, SyncOutcome, TableBackend};
pub use naming::{list_filter, route_name, route_name_prefix, subnet_from_route_name};
pub use plan::{plan_sync, SyncPlan};
