//! Scenario: TableBackend over an in-memory route table
//!
//! # Invariants under test
//!
//! 1. Worked example: one matching route, one missing route -> exactly one
//!    insert and zero deletes.
//! 2. Idempotence: a second sync against unchanged leases issues no mutations.
//! 3. Stale routes (departed owner, moved subnet, unparseable next hop) are
//!    deleted; routes of other networks and foreign routes are never touched.
//! 4. A route vanishing between list and delete does not fail the pass.
//! 5. The first failing call aborts the rest of the pass.
//! 6. Incremental insert is a no-op when correct and replaces a route that
//!    holds the name with another next hop.
//! 7. delete_all_routes removes exactly this network's routes and names them.

use std::net::Ipv4Addr;

use frm_reconcile::{route_name, BackendError, RouteBackend, TableBackend};
use frm_schemas::{DesiredRoutes, LiveRoute, Subnet};
use frm_testkit::{MemoryRouteTable, TableOp};

const NET: &str = "default";

fn sn(s: &str) -> Subnet {
    s.parse().unwrap()
}

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn desired(pairs: &[(&str, &str)]) -> DesiredRoutes {
    pairs.iter().map(|(i, s)| (ip(i), sn(s))).collect()
}

fn route(subnet: &str, next_hop: &str) -> LiveRoute {
    LiveRoute::new(route_name(NET, &sn(subnet)), subnet, next_hop)
}

fn setup() -> (MemoryRouteTable, TableBackend<MemoryRouteTable>) {
    let table = MemoryRouteTable::new(NET);
    let backend = TableBackend::new(table.clone());
    (table, backend)
}

// ---------------------------------------------------------------------------
// 1 + 2. Worked example and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worked_example_inserts_only_missing_route() {
    let (table, backend) = setup();
    table.seed(route("10.1.0.0/24", "203.0.113.5"));

    let want = desired(&[("203.0.113.5", "10.1.0.0/24"), ("203.0.113.9", "10.1.1.0/24")]);
    let outcome = backend.sync(&want).await.unwrap();

    assert_eq!(outcome.inserted, vec!["flannel-default-10-1-1-0-24".to_string()]);
    assert!(outcome.deleted.is_empty());
    assert_eq!(table.calls().insert, 1);
    assert_eq!(table.calls().delete, 0);
    assert_eq!(
        table.route("flannel-default-10-1-1-0-24"),
        Some(route("10.1.1.0/24", "203.0.113.9"))
    );
}

#[tokio::test]
async fn second_sync_issues_no_mutations() {
    let (table, backend) = setup();
    let want = desired(&[
        ("203.0.113.5", "10.1.0.0/24"),
        ("203.0.113.9", "10.1.1.0/24"),
        ("203.0.113.11", "10.1.2.0/24"),
    ]);

    backend.sync(&want).await.unwrap();
    table.reset_calls();

    let outcome = backend.sync(&want).await.unwrap();
    assert!(outcome.is_noop());
    assert_eq!(table.calls().mutations(), 0);
    assert_eq!(table.calls().list, 1, "live routes are always re-listed");
}

// ---------------------------------------------------------------------------
// 3. Stale routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_routes_are_deleted_and_foreign_routes_kept() {
    let (table, backend) = setup();
    // Departed owner.
    table.seed(route("10.1.7.0/24", "203.0.113.70"));
    // Owner now holds a different subnet.
    table.seed(route("10.1.3.0/24", "203.0.113.5"));
    // Garbage next hop under our prefix.
    table.seed(LiveRoute::new("flannel-default-10-1-8-0-24", "10.1.8.0/24", ""));
    // Another network's route and an unrelated route.
    table.seed(LiveRoute::new("flannel-other-10-1-7-0-24", "10.1.7.0/24", "203.0.113.70"));
    table.seed(LiveRoute::new("default-route-abc", "0.0.0.0/0", ""));

    let want = desired(&[("203.0.113.5", "10.1.0.0/24")]);
    let outcome = backend.sync(&want).await.unwrap();

    let mut deleted = outcome.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![
            "flannel-default-10-1-3-0-24".to_string(),
            "flannel-default-10-1-7-0-24".to_string(),
            "flannel-default-10-1-8-0-24".to_string(),
        ]
    );
    assert_eq!(outcome.inserted, vec!["flannel-default-10-1-0-0-24".to_string()]);

    let names: Vec<String> = table.routes().into_iter().map(|r| r.name).collect();
    assert_eq!(
        names,
        vec![
            "default-route-abc".to_string(),
            "flannel-default-10-1-0-0-24".to_string(),
            "flannel-other-10-1-7-0-24".to_string(),
        ]
    );
}

#[tokio::test]
async fn subnet_reassigned_to_new_owner_is_deleted_then_reinserted() {
    let (table, backend) = setup();
    table.seed(route("10.1.0.0/24", "203.0.113.5"));

    let want = desired(&[("203.0.113.99", "10.1.0.0/24")]);
    let outcome = backend.sync(&want).await.unwrap();

    assert_eq!(outcome.deleted, vec!["flannel-default-10-1-0-0-24".to_string()]);
    assert_eq!(outcome.inserted, vec!["flannel-default-10-1-0-0-24".to_string()]);
    assert_eq!(
        table.route("flannel-default-10-1-0-0-24"),
        Some(route("10.1.0.0/24", "203.0.113.99"))
    );
}

// ---------------------------------------------------------------------------
// 4 + 5. Failures during a pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn route_gone_before_delete_does_not_fail_the_pass() {
    let (table, backend) = setup();
    table.seed(route("10.1.7.0/24", "203.0.113.70"));
    table.fail_next(
        TableOp::Delete,
        BackendError::NotFound("flannel-default-10-1-7-0-24".to_string()),
    );

    let outcome = backend
        .sync(&desired(&[("203.0.113.5", "10.1.0.0/24")]))
        .await
        .expect("NotFound on delete is success");

    assert!(outcome.deleted.is_empty(), "nothing was actually deleted");
    assert_eq!(outcome.inserted.len(), 1);
}

#[tokio::test]
async fn first_failure_aborts_remaining_operations() {
    let (table, backend) = setup();
    table.fail_next(TableOp::Insert, BackendError::RateLimited("quota".to_string()));

    let want = desired(&[("203.0.113.5", "10.1.0.0/24"), ("203.0.113.9", "10.1.1.0/24")]);
    let err = backend.sync(&want).await.unwrap_err();

    assert_eq!(err, BackendError::RateLimited("quota".to_string()));
    assert_eq!(table.calls().insert, 1, "second insert must not be attempted");
    assert!(table.routes().is_empty());

    // The next pass converges.
    backend.sync(&want).await.unwrap();
    assert_eq!(table.routes().len(), 2);
}

#[tokio::test]
async fn list_failure_touches_nothing() {
    let (table, backend) = setup();
    table.seed(route("10.1.7.0/24", "203.0.113.70"));
    table.fail_next(TableOp::List, BackendError::Unavailable("503".to_string()));

    assert!(backend.sync(&DesiredRoutes::new()).await.is_err());
    assert_eq!(table.calls().mutations(), 0);
    assert_eq!(table.routes().len(), 1);
}

// ---------------------------------------------------------------------------
// 6. Incremental insert / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_is_noop_when_route_already_correct() {
    let (table, backend) = setup();
    table.seed(route("10.1.0.0/24", "203.0.113.5"));

    backend.insert(ip("203.0.113.5"), sn("10.1.0.0/24")).await.unwrap();

    assert_eq!(table.calls().mutations(), 0);
}

#[tokio::test]
async fn insert_replaces_route_with_other_next_hop() {
    let (table, backend) = setup();
    table.seed(route("10.1.0.0/24", "203.0.113.5"));

    backend.insert(ip("203.0.113.99"), sn("10.1.0.0/24")).await.unwrap();

    assert_eq!(table.calls().delete, 1);
    assert_eq!(table.calls().insert, 1);
    assert_eq!(
        table.route("flannel-default-10-1-0-0-24"),
        Some(route("10.1.0.0/24", "203.0.113.99"))
    );
}

#[tokio::test]
async fn delete_of_absent_route_is_success() {
    let (table, backend) = setup();
    backend.delete(sn("10.1.0.0/24")).await.unwrap();
    assert_eq!(table.calls().delete, 1);
}

// ---------------------------------------------------------------------------
// 7. delete_all_routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_all_removes_only_this_networks_routes() {
    let (table, backend) = setup();
    table.seed(route("10.1.0.0/24", "203.0.113.5"));
    table.seed(route("10.1.1.0/24", "203.0.113.9"));
    table.seed(LiveRoute::new("flannel-other-10-1-1-0-24", "10.1.1.0/24", "203.0.113.9"));

    let deleted = backend.delete_all_routes().await.unwrap();

    assert_eq!(
        deleted,
        vec![
            "flannel-default-10-1-0-0-24".to_string(),
            "flannel-default-10-1-1-0-24".to_string(),
        ]
    );
    assert_eq!(table.routes().len(), 1);
    assert_eq!(backend.delete_all_routes().await.unwrap(), Vec::<String>::new());
}
