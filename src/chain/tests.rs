//! Chain Module Tests
//!
//! Runs real multi-node chains over loopback HTTP: every test node gets its
//! own ephemeral port and router, and the topology is installed directly the
//! way a coordinator would push it.
//!
//! ## Test Scopes
//! - **Write path**: head version assignment, forwarding, tail commit and the
//!   back-propagated acknowledgment the head waits for.
//! - **Read path**: local answers for clean keys, tail consultation whenever
//!   a newer dirty version exists, item fetch for replicas that lag behind.
//! - **Catch-up**: forward-then-back reconciliation when a predecessor
//!   changes, and the commit sweep when a node is promoted to tail.
//! - **Role enforcement**: writes rejected off-head, forwards rejected at the
//!   head.

use crate::chain::handlers;
use crate::chain::node::ChainNode;
use crate::chain::protocol::{
    ClientWriteRequest, ClientWriteResponse, ENDPOINT_READ, ENDPOINT_UPDATE_NEIGHBOR,
    ENDPOINT_WRITE, ReadResponse, UpdateNeighborRequest,
};
use crate::chain::types::{NeighborPos, NodeError};
use crate::coordinator::protocol::NodeMeta;
use crate::storage::Store;
use crate::storage::memory::MemStore;
use crate::storage::types::Item;
use std::sync::Arc;
use std::time::Duration;

struct TestNode {
    node: Arc<ChainNode>,
    store: Arc<MemStore>,
    path: String,
}

async fn spawn_node() -> TestNode {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let path = listener.local_addr().unwrap().to_string();

    let store = Arc::new(MemStore::new());
    let node = Arc::new(
        ChainNode::new(
            &path,
            store.clone(),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
        .unwrap(),
    );

    let app = handlers::router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestNode { node, store, path }
}

fn make_meta(is_head: bool, is_tail: bool, tail_path: &str, prev_path: &str) -> NodeMeta {
    NodeMeta {
        is_head,
        is_tail,
        tail_path: tail_path.to_string(),
        prev_path: prev_path.to_string(),
    }
}

/// Wires the given nodes into a chain, first to last, the way the
/// coordinator would: role bits plus predecessor/tail from registration,
/// successors via neighbor pushes.
async fn link_chain(nodes: &[&TestNode]) {
    let tail_path = nodes.last().unwrap().path.clone();
    for (i, tn) in nodes.iter().enumerate() {
        let is_head = i == 0;
        let is_tail = i == nodes.len() - 1;
        let prev_path = if is_head {
            String::new()
        } else {
            nodes[i - 1].path.clone()
        };
        let tail = if is_tail { String::new() } else { tail_path.clone() };
        tn.node
            .apply_node_meta(&make_meta(is_head, is_tail, &tail, &prev_path))
            .await
            .unwrap();
        if !is_tail {
            tn.node
                .apply_neighbor_update(NeighborPos::Successor, &nodes[i + 1].path)
                .await
                .unwrap();
        }
    }
}

fn sorted_items(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by(|a, b| (&a.key, a.version).cmp(&(&b.key, b.version)));
    items
}

// ============================================================
// WRITE PATH
// ============================================================

#[tokio::test]
async fn test_three_node_chain_write_and_read_everywhere() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    let c = spawn_node().await;
    link_chain(&[&a, &b, &c]).await;

    let version = a.node.client_write("x", b"1".to_vec()).await.unwrap();
    assert_eq!(version, 1);

    for tn in [&a, &b, &c] {
        assert_eq!(tn.node.client_read("x").await.unwrap(), b"1".to_vec());
        assert_eq!(tn.node.latest_seen("x"), 1);
    }

    // The head only answers once its own commit landed.
    assert!(a.store.read("x").unwrap().committed);
}

#[tokio::test]
async fn test_singleton_chain_commits_immediately() {
    let a = spawn_node().await;
    a.node
        .apply_node_meta(&make_meta(true, true, "", ""))
        .await
        .unwrap();

    let version = a.node.client_write("y", b"7".to_vec()).await.unwrap();
    assert_eq!(version, 1);
    assert_eq!(a.node.client_read("y").await.unwrap(), b"7".to_vec());
    assert!(a.store.all_dirty().unwrap().is_empty());
}

#[tokio::test]
async fn test_versions_increase_per_key() {
    let a = spawn_node().await;
    a.node
        .apply_node_meta(&make_meta(true, true, "", ""))
        .await
        .unwrap();

    assert_eq!(a.node.client_write("k", b"1".to_vec()).await.unwrap(), 1);
    assert_eq!(a.node.client_write("k", b"2".to_vec()).await.unwrap(), 2);
    assert_eq!(a.node.client_write("other", b"1".to_vec()).await.unwrap(), 1);
    assert_eq!(a.node.client_read("k").await.unwrap(), b"2".to_vec());
}

#[tokio::test]
async fn test_concurrent_head_writes_get_unique_versions() {
    let a = spawn_node().await;
    a.node
        .apply_node_meta(&make_meta(true, true, "", ""))
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10u32 {
        let node = a.node.clone();
        tasks.spawn(async move {
            node.client_write("k", format!("v{}", i).into_bytes())
                .await
                .unwrap()
        });
    }

    let mut versions = Vec::new();
    while let Some(result) = tasks.join_next().await {
        versions.push(result.unwrap());
    }
    versions.sort();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_write_rejected_at_non_head() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    let err = b.node.client_write("k", b"v".to_vec()).await.unwrap_err();
    assert!(matches!(err, NodeError::TopologyOutOfSync(_)));
}

#[tokio::test]
async fn test_forward_rejected_at_head() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    let err = a
        .node
        .apply_forward("k", b"v".to_vec(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::TopologyOutOfSync(_)));
}

// ============================================================
// READ PATH
// ============================================================

#[tokio::test]
async fn test_read_missing_key_returns_not_found() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    assert!(matches!(
        a.node.client_read("nope").await.unwrap_err(),
        NodeError::NotFound
    ));
}

#[tokio::test]
async fn test_read_consults_tail_before_backpropagation_arrives() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    let c = spawn_node().await;
    link_chain(&[&a, &b, &c]).await;

    a.node.client_write("x", b"1".to_vec()).await.unwrap();

    // Freeze the moment where the tail has committed v2 but the commit
    // acknowledgments have not reached a and b yet.
    for tn in [&a, &b] {
        tn.store.write("x", b"2".to_vec(), 2).unwrap();
        tn.node.record_version("x", 2);
    }
    c.store.write("x", b"2".to_vec(), 2).unwrap();
    c.store.commit("x", 2).unwrap();
    c.node.record_version("x", 2);

    // Both lagging replicas must consult the tail and answer v2, not v1.
    assert_eq!(a.node.client_read("x").await.unwrap(), b"2".to_vec());
    assert_eq!(b.node.client_read("x").await.unwrap(), b"2".to_vec());
}

#[tokio::test]
async fn test_read_of_dirty_only_key_returns_tail_verdict() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    // A first version still in flight: dirty at the head, unknown at the tail.
    a.store.write("w", b"x".to_vec(), 1).unwrap();
    a.node.record_version("w", 1);

    assert!(matches!(
        a.node.client_read("w").await.unwrap_err(),
        NodeError::NotFound
    ));
}

#[tokio::test]
async fn test_read_fetches_item_from_tail_when_missing_locally() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    b.store.write("k", b"v".to_vec(), 1).unwrap();
    b.store.commit("k", 1).unwrap();
    b.node.record_version("k", 1);

    // The replica knows the version exists but lost the race for the item.
    a.node.record_version("k", 1);
    assert_eq!(a.node.client_read("k").await.unwrap(), b"v".to_vec());
}

// ============================================================
// COMMIT SEMANTICS
// ============================================================

#[tokio::test]
async fn test_commit_applied_twice_is_idempotent() {
    let a = spawn_node().await;
    a.node
        .apply_node_meta(&make_meta(true, true, "", ""))
        .await
        .unwrap();

    a.node.client_write("k", b"v".to_vec()).await.unwrap();

    a.node.apply_commit("k", 1).await.unwrap();
    a.node.apply_commit("k", 1).await.unwrap();

    let committed = a.store.all_committed().unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].version, 1);
}

#[tokio::test]
async fn test_commit_of_unknown_version_is_rejected() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    let err = a.node.apply_commit("ghost", 3).await.unwrap_err();
    assert!(matches!(err, NodeError::NotFound));
}

// ============================================================
// CATCH-UP PROTOCOL
// ============================================================

#[tokio::test]
async fn test_joining_node_catches_up_from_predecessor() {
    let a = spawn_node().await;
    let c = spawn_node().await;
    link_chain(&[&a, &c]).await;

    a.node.client_write("x", b"1".to_vec()).await.unwrap();

    // An in-flight dirty item that only the head has seen.
    a.store.write("y", b"1".to_vec(), 1).unwrap();
    a.node.record_version("y", 1);

    // b joins between a and c.
    let b = spawn_node().await;
    b.node
        .apply_node_meta(&make_meta(false, false, &c.path, &a.path))
        .await
        .unwrap();
    b.node
        .apply_neighbor_update(NeighborPos::Successor, &c.path)
        .await
        .unwrap();
    a.node
        .apply_neighbor_update(NeighborPos::Successor, &b.path)
        .await
        .unwrap();
    c.node
        .apply_neighbor_update(NeighborPos::Predecessor, &b.path)
        .await
        .unwrap();

    assert_eq!(
        sorted_items(b.store.all_committed().unwrap()),
        sorted_items(a.store.all_committed().unwrap())
    );

    let b_dirty = sorted_items(b.store.all_dirty().unwrap());
    for item in sorted_items(a.store.all_dirty().unwrap()) {
        assert!(b_dirty.contains(&item), "missing dirty item {:?}", item);
    }
    assert_eq!(b.node.latest_seen("x"), 1);
    assert_eq!(b.node.latest_seen("y"), 1);
}

#[tokio::test]
async fn test_repointed_predecessor_with_newer_dirty_version() {
    let p = spawn_node().await;
    let n = spawn_node().await;

    // n starts as the tail of its chain and already has z@1 committed.
    n.node
        .apply_node_meta(&make_meta(false, true, "", ""))
        .await
        .unwrap();
    n.store.write("z", b"a".to_vec(), 1).unwrap();
    n.store.commit("z", 1).unwrap();
    n.node.record_version("z", 1);

    // The fresh predecessor holds the same committed version plus an
    // uncommitted newer one.
    p.node
        .apply_node_meta(&make_meta(true, false, &n.path, ""))
        .await
        .unwrap();
    p.node
        .apply_neighbor_update(NeighborPos::Successor, &n.path)
        .await
        .unwrap();
    p.store.write("z", b"a".to_vec(), 1).unwrap();
    p.store.commit("z", 1).unwrap();
    p.store.write("z", b"b".to_vec(), 2).unwrap();
    p.node.record_version("z", 2);

    // Coordinator repoints n's predecessor to p; catch-up runs.
    n.node
        .apply_node_meta(&make_meta(false, true, "", &p.path))
        .await
        .unwrap();

    // n now holds the committed v1 and the still-dirty v2.
    assert!(n.store.read_version("z", 1).unwrap().committed);
    assert!(!n.store.read_version("z", 2).unwrap().committed);

    // The read goes through the tail consultation and answers the
    // committed value.
    assert_eq!(n.node.client_read("z").await.unwrap(), b"a".to_vec());
}

#[tokio::test]
async fn test_tail_promotion_commits_local_dirty_items() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    let c = spawn_node().await;
    link_chain(&[&a, &b, &c]).await;

    // A write that made it to b but died before reaching the old tail.
    for tn in [&a, &b] {
        tn.store.write("k", b"v".to_vec(), 1).unwrap();
        tn.node.record_version("k", 1);
    }

    // c fails; the coordinator tells b it has no successor anymore.
    b.node
        .apply_neighbor_update(NeighborPos::Successor, "")
        .await
        .unwrap();

    assert!(b.store.all_dirty().unwrap().is_empty());
    assert!(b.store.read("k").unwrap().committed);

    // The commit acknowledgment travels back to the head.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a.store.read("k").unwrap().committed);
    assert_eq!(a.node.client_read("k").await.unwrap(), b"v".to_vec());
}

// ============================================================
// HTTP SURFACE
// ============================================================

#[tokio::test]
async fn test_public_endpoints_over_http() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{}{}", a.path, ENDPOINT_WRITE))
        .json(&ClientWriteRequest {
            key: "k".to_string(),
            value: b"v".to_vec(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let ack: ClientWriteResponse = response.json().await.unwrap();
    assert_eq!(ack.version, Some(1));

    let response = http
        .get(format!("http://{}{}/k", b.path, ENDPOINT_READ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: ReadResponse = response.json().await.unwrap();
    assert_eq!(body.value, Some(b"v".to_vec()));

    // Writes sent anywhere but the head come back as a topology conflict.
    let response = http
        .post(format!("http://{}{}", b.path, ENDPOINT_WRITE))
        .json(&ClientWriteRequest {
            key: "k".to_string(),
            value: b"x".to_vec(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_update_neighbor_endpoint_repoints_topology() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{}{}", b.path, ENDPOINT_UPDATE_NEIGHBOR))
        .json(&UpdateNeighborRequest {
            position: NeighborPos::Predecessor,
            path: String::new(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let topo = b.node.topology().await;
    assert!(topo.is_head);
    assert!(topo.neighbor(NeighborPos::Predecessor).is_none());
}

#[tokio::test]
async fn test_predecessor_cleared_makes_node_head() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    link_chain(&[&a, &b]).await;

    // a fails; the coordinator promotes b to head (and only member).
    b.node
        .apply_neighbor_update(NeighborPos::Predecessor, "")
        .await
        .unwrap();
    b.node
        .apply_neighbor_update(NeighborPos::Successor, "")
        .await
        .unwrap();

    let topo = b.node.topology().await;
    assert!(topo.is_head);
    assert!(topo.is_tail);
    assert!(topo.neighbors.is_empty());

    b.node.client_write("k", b"v".to_vec()).await.unwrap();
    assert_eq!(b.node.client_read("k").await.unwrap(), b"v".to_vec());
}
