//! Scenario: etcd v2 lease store over HTTP
//!
//! # Invariants under test
//!
//! 1. A full read returns every leaf lease and the `X-Etcd-Index` index.
//! 2. An absent prefix is an empty tree, not an error.
//! 3. A watch returns the action, key, value and modified index of the change,
//!    and asks etcd to wait from the requested index.
//! 4. A compacted watch index surfaces as `WatchExpired`.
//! 5. Server errors and refused connections surface as `Unavailable`.
//!
//! All tests run against an in-process `httpmock` server.

use frm_schemas::{LeaseNode, WatchAction};
use frm_store::{EtcdLeaseStore, LeaseStore, StoreError};
use httpmock::prelude::*;
use serde_json::json;

const PREFIX: &str = "/coreos.com/network/subnets";
const KEYS_PATH: &str = "/v2/keys/coreos.com/network/subnets";

// ---------------------------------------------------------------------------
// 1. Full read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_tree_returns_leaves_and_header_index() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(KEYS_PATH)
                .query_param("recursive", "true")
                .query_param("sorted", "true");
            then.status(200).header("X-Etcd-Index", "42").json_body(json!({
                "action": "get",
                "node": {
                    "key": PREFIX,
                    "dir": true,
                    "nodes": [
                        {
                            "key": "/coreos.com/network/subnets/10.1.0.0-24",
                            "value": "{\"PublicIP\":\"203.0.113.5\"}",
                            "modifiedIndex": 17,
                            "createdIndex": 17
                        },
                        {
                            "key": "/coreos.com/network/subnets/10.1.1.0-24",
                            "value": "{\"PublicIP\":\"203.0.113.9\"}",
                            "modifiedIndex": 40,
                            "createdIndex": 21
                        }
                    ],
                    "modifiedIndex": 5,
                    "createdIndex": 5
                }
            }));
        })
        .await;

    let store = EtcdLeaseStore::new(server.base_url());
    let tree = store.get_tree(PREFIX).await.expect("get_tree must succeed");

    m.assert_async().await;
    assert_eq!(tree.index, 42);
    assert_eq!(
        tree.nodes,
        vec![
            LeaseNode::new(
                "/coreos.com/network/subnets/10.1.0.0-24",
                "{\"PublicIP\":\"203.0.113.5\"}",
                17
            ),
            LeaseNode::new(
                "/coreos.com/network/subnets/10.1.1.0-24",
                "{\"PublicIP\":\"203.0.113.9\"}",
                40
            ),
        ]
    );
}

// ---------------------------------------------------------------------------
// 2. Absent prefix
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_prefix_is_empty_tree() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(KEYS_PATH);
            then.status(404).header("X-Etcd-Index", "9").json_body(json!({
                "errorCode": 100,
                "message": "Key not found",
                "cause": PREFIX,
                "index": 9
            }));
        })
        .await;

    let store = EtcdLeaseStore::new(server.base_url());
    let tree = store.get_tree(PREFIX).await.expect("absent prefix is not an error");

    assert_eq!(tree.index, 9);
    assert!(tree.nodes.is_empty());
}

// ---------------------------------------------------------------------------
// 3. Watch event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn watch_returns_event_from_requested_index() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(KEYS_PATH)
                .query_param("wait", "true")
                .query_param("recursive", "true")
                .query_param("waitIndex", "43");
            then.status(200).header("X-Etcd-Index", "44").json_body(json!({
                "action": "delete",
                "node": {
                    "key": "/coreos.com/network/subnets/10.1.0.0-24",
                    "modifiedIndex": 44,
                    "createdIndex": 17
                },
                "prevNode": {
                    "key": "/coreos.com/network/subnets/10.1.0.0-24",
                    "value": "{\"PublicIP\":\"203.0.113.5\"}",
                    "modifiedIndex": 17,
                    "createdIndex": 17
                }
            }));
        })
        .await;

    let store = EtcdLeaseStore::new(server.base_url());
    let ev = store.watch(PREFIX, 43).await.expect("watch must succeed");

    m.assert_async().await;
    assert_eq!(ev.action, WatchAction::Delete);
    assert_eq!(ev.node.key, "/coreos.com/network/subnets/10.1.0.0-24");
    assert_eq!(ev.node.value, "");
    assert_eq!(ev.index(), 44);
}

// ---------------------------------------------------------------------------
// 4. Compacted index
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleared_index_is_watch_expired() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(KEYS_PATH).query_param("wait", "true");
            then.status(400).json_body(json!({
                "errorCode": 401,
                "message": "The event in requested index is outdated and cleared",
                "cause": "the requested history has been cleared [1008/7]",
                "index": 2007
            }));
        })
        .await;

    let store = EtcdLeaseStore::new(server.base_url());
    let err = store.watch(PREFIX, 7).await.unwrap_err();

    assert_eq!(
        err,
        StoreError::WatchExpired {
            requested: 7,
            current: 2007
        }
    );
}

// ---------------------------------------------------------------------------
// 5. Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(KEYS_PATH);
            then.status(503).body("no leader");
        })
        .await;

    let store = EtcdLeaseStore::new(server.base_url());
    let err = store.get_tree(PREFIX).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)), "got {err:?}");
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    // Port 1 is never listening in the test environment.
    let store = EtcdLeaseStore::new("http://127.0.0.1:1");
    let err = store.get_tree(PREFIX).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)), "got {err:?}");

    let err = store.watch(PREFIX, 1).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)), "got {err:?}");
}
