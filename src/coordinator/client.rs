//! Coordinator Client
//!
//! Announces the node to the chain coordinator and installs the returned
//! assignment. Registration failure is fatal to startup; afterwards the
//! coordinator keeps the node current by pushing neighbor updates to the
//! node's own HTTP endpoint, so there is no standing connection to watch.

use anyhow::Result;

use super::protocol::{AddNodeRequest, ENDPOINT_ADD_NODE, NodeMeta};
use crate::chain::node::ChainNode;

pub struct CoordinatorClient {
    http: reqwest::Client,
    path: String,
}

impl CoordinatorClient {
    pub fn new(http: reqwest::Client, path: &str) -> Self {
        Self {
            http,
            path: path.to_string(),
        }
    }

    /// Announces a node to the coordinator and returns its chain assignment.
    pub async fn add_node(&self, node_path: &str) -> Result<NodeMeta> {
        let response = self
            .http
            .post(format!("http://{}{}", self.path, ENDPOINT_ADD_NODE))
            .json(&AddNodeRequest {
                path: node_path.to_string(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("coordinator rejected registration: {}", response.status());
        }
        Ok(response.json().await?)
    }
}

/// Registers the node with the coordinator at `coordinator_path` and applies
/// the returned role and neighbor assignment, including the catch-up run a
/// non-empty predecessor implies.
pub async fn register(
    node: &ChainNode,
    coordinator_path: &str,
    http: reqwest::Client,
) -> Result<()> {
    let client = CoordinatorClient::new(http, coordinator_path);
    let meta = client.add_node(node.path()).await?;
    tracing::info!(
        "registered with coordinator at {}: head={} tail={}",
        coordinator_path,
        meta.is_head,
        meta.is_tail
    );
    node.apply_node_meta(&meta).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::Role;
    use crate::storage::memory::MemStore;
    use axum::{Json, Router, routing::post};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_installs_assignment() {
        // Fake coordinator that makes every announcer a singleton chain.
        let app = Router::new().route(
            ENDPOINT_ADD_NODE,
            post(|Json(_): Json<AddNodeRequest>| async {
                Json(NodeMeta {
                    is_head: true,
                    is_tail: true,
                    tail_path: String::new(),
                    prev_path: String::new(),
                })
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coordinator_path = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = Arc::new(MemStore::new());
        let node = ChainNode::new(
            "127.0.0.1:9",
            store,
            reqwest::Client::new(),
            Duration::from_secs(1),
        )
        .unwrap();

        register(&node, &coordinator_path, reqwest::Client::new())
            .await
            .unwrap();

        let topo = node.topology().await;
        assert!(topo.is_head);
        assert!(topo.is_tail);
        assert_eq!(topo.role(), Role::HeadAndTail);
        assert!(topo.neighbors.is_empty());
    }

    #[tokio::test]
    async fn test_register_fails_when_coordinator_unreachable() {
        let store = Arc::new(MemStore::new());
        let node = ChainNode::new(
            "127.0.0.1:9",
            store,
            reqwest::Client::new(),
            Duration::from_secs(1),
        )
        .unwrap();

        // Nothing is listening on this port.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        let result = register(&node, "127.0.0.1:1", http).await;
        assert!(result.is_err());
    }
}
