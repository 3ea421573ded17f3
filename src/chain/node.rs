//! Chain Replica Node
//!
//! The replica that stores object versions, participates in the write/commit
//! chain protocol, serves reads under the apportioned-query rule, and
//! reconciles its state with a new predecessor when the coordinator changes
//! the topology.
//!
//! ## Protocol Summary
//! - **Writes** enter at the head, which assigns the version and forwards the
//!   dirty item toward the tail. The tail commits on arrival and the commit
//!   acknowledgment travels back up the chain; the head answers the client
//!   once its own commit lands.
//! - **Reads** are answered locally when the newest known version is the
//!   committed one; any ambiguity triggers a single version query to the
//!   tail, which keeps reads linearizable even on replicas holding newer
//!   dirty versions.
//! - **Catch-up** runs when the predecessor changes: dirty items are pulled
//!   first (forward propagation), then commits (back propagation), so every
//!   commit finds its version already present.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, oneshot};

use super::client::NodeClient;
use super::protocol::{ItemPayload, PropagateRequest, PropagateResponse};
use super::types::{Neighbor, NeighborPos, NodeError, Topology};
use crate::coordinator::protocol::NodeMeta;
use crate::storage::Store;
use crate::storage::types::{Item, StoreError};

pub struct ChainNode {
    /// Reachable host:port of this node, as announced to the coordinator.
    path: String,
    store: Arc<dyn Store>,
    /// Highest version ever seen per key, dirty or committed.
    latest: DashMap<String, u64>,
    topology: RwLock<Topology>,
    /// Write acknowledgments the head is waiting on, keyed by (key, version).
    pending_commits: DashMap<(String, u64), oneshot::Sender<()>>,
    http: reqwest::Client,
    write_timeout: Duration,
}

impl ChainNode {
    /// Creates a node on top of an existing store. The latest-version map is
    /// rebuilt from whatever the store already holds, so a backend that
    /// persists across restarts picks up where it left off.
    pub fn new(
        path: &str,
        store: Arc<dyn Store>,
        http: reqwest::Client,
        write_timeout: Duration,
    ) -> Result<Self, NodeError> {
        let latest = DashMap::new();
        let mut items = store.all_dirty()?;
        items.extend(store.all_committed()?);
        for item in items {
            latest
                .entry(item.key)
                .and_modify(|v: &mut u64| *v = (*v).max(item.version))
                .or_insert(item.version);
        }

        Ok(Self {
            path: path.to_string(),
            store,
            latest,
            topology: RwLock::new(Topology::default()),
            pending_commits: DashMap::new(),
            http,
            write_timeout,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tracked_keys(&self) -> usize {
        self.latest.len()
    }

    /// Returns a snapshot of the current topology. Callers never see the lock.
    pub async fn topology(&self) -> Topology {
        self.topology.read().await.clone()
    }

    /// Highest version this node has seen for the key, or 0.
    pub fn latest_seen(&self, key: &str) -> u64 {
        self.latest.get(key).map(|v| *v).unwrap_or(0)
    }

    pub(crate) fn record_version(&self, key: &str, version: u64) {
        self.latest
            .entry(key.to_string())
            .and_modify(|v| {
                if version > *v {
                    *v = version;
                }
            })
            .or_insert(version);
    }

    fn connect(&self, path: &str) -> Neighbor {
        Neighbor {
            client: NodeClient::new(self.http.clone(), path),
            path: path.to_string(),
        }
    }

    fn notify_committed(&self, key: &str, version: u64) {
        if let Some((_, tx)) = self.pending_commits.remove(&(key.to_string(), version)) {
            let _ = tx.send(());
        }
    }

    /// Sends a commit acknowledgment to the predecessor without blocking the
    /// caller. Failures are logged and left to coordinator-driven repair.
    fn backpropagate_commit(&self, prev: &Neighbor, key: &str, version: u64) {
        let client = prev.client.clone();
        let path = prev.path.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.commit(&key, version).await {
                tracing::warn!(
                    "commit back-propagation of {}@{} to {} failed: {}",
                    key,
                    version,
                    path,
                    e
                );
            }
        });
    }

    // --- Write path ---

    /// Accepts a client write. Only valid at the head.
    ///
    /// Returns the assigned version once the commit acknowledgment has made
    /// it back from the tail, or an error if the deadline expires first.
    pub async fn client_write(&self, key: &str, value: Vec<u8>) -> Result<u64, NodeError> {
        let topo = self.topology().await;
        if !topo.is_head {
            return Err(NodeError::TopologyOutOfSync(
                "client writes are only accepted at the head",
            ));
        }

        let version = {
            // The map entry serializes concurrent head writes to the same
            // key; holding it across the store write keeps version order and
            // arrival order identical.
            let mut slot = self.latest.entry(key.to_string()).or_insert(0);
            let version = *slot + 1;
            self.store.write(key, value.clone(), version)?;
            *slot = version;
            version
        };
        tracing::debug!("accepted write {}@{}", key, version);

        if topo.is_tail {
            // Singleton chain: this node is the commit authority.
            self.store.commit(key, version)?;
            return Ok(version);
        }

        let Some(successor) = topo.neighbor(NeighborPos::Successor).cloned() else {
            return Err(NodeError::TopologyOutOfSync("head has no successor connection"));
        };

        let (tx, rx) = oneshot::channel();
        self.pending_commits.insert((key.to_string(), version), tx);

        if let Err(e) = successor.client.write(key, &value, version).await {
            self.pending_commits.remove(&(key.to_string(), version));
            return Err(NodeError::Transport(e.to_string()));
        }

        match tokio::time::timeout(self.write_timeout, rx).await {
            Ok(Ok(())) => Ok(version),
            _ => {
                self.pending_commits.remove(&(key.to_string(), version));
                Err(NodeError::CommitDeadline)
            }
        }
    }

    /// Ingests a dirty item forwarded by the predecessor and keeps it moving
    /// toward the tail. At the tail the item is committed instead and the
    /// acknowledgment starts its way back.
    pub async fn apply_forward(
        &self,
        key: &str,
        value: Vec<u8>,
        version: u64,
    ) -> Result<(), NodeError> {
        let topo = self.topology().await;
        if topo.is_head {
            return Err(NodeError::TopologyOutOfSync(
                "the head does not accept forwarded writes",
            ));
        }

        self.record_version(key, version);
        if !self.ingest_dirty(key, value.clone(), version)? {
            // Duplicate delivery of an item we already hold.
            return Ok(());
        }

        if topo.is_tail {
            self.store.commit(key, version)?;
            self.notify_committed(key, version);
            if let Some(prev) = topo.neighbor(NeighborPos::Predecessor) {
                self.backpropagate_commit(prev, key, version);
            }
            return Ok(());
        }

        let Some(successor) = topo.neighbor(NeighborPos::Successor).cloned() else {
            return Err(NodeError::TopologyOutOfSync("no successor connection for forwarding"));
        };
        successor
            .client
            .write(key, &value, version)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))
    }

    /// Writes a dirty item, treating duplicates of the same value as no-ops.
    /// Returns whether the item was actually inserted.
    fn ingest_dirty(&self, key: &str, value: Vec<u8>, version: u64) -> Result<bool, NodeError> {
        match self.store.write(key, value.clone(), version) {
            Ok(()) => Ok(true),
            Err(StoreError::VersionExists { .. }) => match self.store.read_version(key, version) {
                Ok(existing) if existing.value == value => Ok(false),
                Ok(_) => Err(NodeError::VersionConflict {
                    key: key.to_string(),
                    version,
                }),
                // The slot was superseded by a newer committed version.
                Err(StoreError::NotFound) => Ok(false),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a commit acknowledgment arriving from the successor side and
    /// keeps it moving toward the head.
    pub async fn apply_commit(&self, key: &str, version: u64) -> Result<(), NodeError> {
        match self.store.commit(key, version) {
            Ok(()) => {}
            Err(StoreError::NotFound) => {
                // The commit outran its forward propagation; the next
                // coordinator event reconciles via catch-up.
                tracing::warn!("commit for unknown item {}@{}", key, version);
                return Err(NodeError::NotFound);
            }
            Err(e) => return Err(e.into()),
        }
        self.record_version(key, version);
        self.notify_committed(key, version);

        let topo = self.topology().await;
        if let Some(prev) = topo.neighbor(NeighborPos::Predecessor) {
            self.backpropagate_commit(prev, key, version);
        }
        Ok(())
    }

    // --- Read path ---

    /// Serves a read at any replica position.
    ///
    /// The committed item is returned directly only when it is also the
    /// newest version this node has ever seen for the key; any newer dirty
    /// version forces a version query to the tail, whose committed state is
    /// authoritative for the whole chain.
    pub async fn client_read(&self, key: &str) -> Result<Vec<u8>, NodeError> {
        let latest = self.latest_seen(key);
        match self.store.read(key) {
            Ok(item) if item.version == latest => Ok(item.value),
            Ok(_) => self.consult_tail(key).await,
            Err(StoreError::Dirty) => self.consult_tail(key).await,
            Err(StoreError::NotFound) if latest == 0 => Err(NodeError::NotFound),
            Err(StoreError::NotFound) => self.consult_tail(key).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn consult_tail(&self, key: &str) -> Result<Vec<u8>, NodeError> {
        let topo = self.topology().await;
        if topo.is_tail {
            // This node is the authority; only its committed state counts.
            return match self.store.read(key) {
                Ok(item) => Ok(item.value),
                Err(_) => Err(NodeError::NotFound),
            };
        }

        let Some(tail) = topo.neighbor(NeighborPos::Tail).cloned() else {
            return Err(NodeError::TopologyOutOfSync("no tail connection for version query"));
        };

        let version = tail
            .client
            .latest_version(key)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let Some(version) = version else {
            return Err(NodeError::NotFound);
        };

        match self.store.read_version(key, version) {
            Ok(item) => Ok(item.value),
            Err(StoreError::NotFound) => {
                // The committed item has not reached this replica yet (e.g.
                // mid catch-up); pull it straight from the tail.
                let item = tail
                    .client
                    .read_version(key, version)
                    .await
                    .map_err(|e| NodeError::Transport(e.to_string()))?;
                item.map(|payload| payload.value).ok_or(NodeError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Answers the read-path version query. Meaningful at the tail, where no
    /// dirty versions linger: the newest committed version is the chain-wide
    /// truth for the key.
    pub fn latest_committed(&self, key: &str) -> Option<u64> {
        self.store.read(key).map(|item| item.version).ok()
    }

    /// Serves one exact (key, version) item from local state.
    pub fn local_item(&self, key: &str, version: u64) -> Option<Item> {
        self.store.read_version(key, version).ok()
    }

    // --- Catch-up protocol ---

    /// Answers a forward-propagation request from a successor: every dirty
    /// item newer than what the caller already holds.
    pub fn fwd_propagation(&self, req: &PropagateRequest) -> Result<PropagateResponse, NodeError> {
        let items = self.store.all_newer_dirty(&req.keys)?;
        Ok(propagate_response(items))
    }

    /// Answers a back-propagation request from a successor: every committed
    /// item newer than what the caller already holds.
    pub fn back_propagation(&self, req: &PropagateRequest) -> Result<PropagateResponse, NodeError> {
        let items = self.store.all_newer_committed(&req.keys)?;
        Ok(propagate_response(items))
    }

    /// Reconciles local state with a new predecessor.
    ///
    /// Forward propagation runs first so every dirty item is present before
    /// the commits for those versions arrive through back propagation.
    pub async fn full_propagate(&self, prev: &NodeClient) -> Result<(), NodeError> {
        let dirty = self.store.all_dirty()?;
        let reply = prev
            .fwd_propagate(&propagate_request(&dirty))
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let mut pulled = 0;
        for (key, items) in reply.items {
            for payload in items {
                self.record_version(&key, payload.version);
                self.ingest_dirty(&key, payload.value, payload.version)?;
                pulled += 1;
            }
        }
        tracing::debug!("forward propagation pulled {} dirty item(s)", pulled);

        let committed = self.store.all_committed()?;
        let reply = prev
            .back_propagate(&propagate_request(&committed))
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let mut pulled = 0;
        for (key, items) in reply.items {
            for payload in items {
                self.record_version(&key, payload.version);
                // A version exists as dirty before it exists as committed,
                // even when it arrives already acknowledged.
                self.ingest_dirty(&key, payload.value, payload.version)?;
                self.store.commit(&key, payload.version)?;
                self.notify_committed(&key, payload.version);
                pulled += 1;
            }
        }
        tracing::debug!("back propagation pulled {} committed item(s)", pulled);
        Ok(())
    }

    // --- Topology handling ---

    /// Installs the role and neighbor assignment received from the
    /// coordinator. A changed, non-empty predecessor triggers catch-up; a
    /// promotion to tail commits everything still dirty locally.
    pub async fn apply_node_meta(&self, meta: &NodeMeta) -> Result<(), NodeError> {
        let mut catch_up = None;
        let promoted;
        {
            let mut topo = self.topology.write().await;
            promoted = meta.is_tail && !topo.is_tail;
            topo.is_head = meta.is_head;
            topo.is_tail = meta.is_tail;

            if meta.is_tail {
                topo.neighbors.remove(&NeighborPos::Tail);
                topo.neighbors.remove(&NeighborPos::Successor);
            } else if !meta.tail_path.is_empty()
                && topo.neighbor(NeighborPos::Tail).map(|n| n.path.as_str())
                    != Some(meta.tail_path.as_str())
            {
                let nbr = self.connect(&meta.tail_path);
                topo.neighbors.insert(NeighborPos::Tail, nbr);
            }

            if meta.prev_path.is_empty() {
                // No predecessor: this node is the head; drop any old connection.
                topo.neighbors.remove(&NeighborPos::Predecessor);
            } else if topo
                .neighbor(NeighborPos::Predecessor)
                .map(|n| n.path.as_str())
                != Some(meta.prev_path.as_str())
            {
                let nbr = self.connect(&meta.prev_path);
                topo.neighbors.insert(NeighborPos::Predecessor, nbr.clone());
                catch_up = Some(nbr);
            }

            tracing::info!("assigned role {:?}", topo.role());
        }

        // The assignment itself is installed; a failed catch-up or commit
        // sweep is logged and left to the next coordinator event.
        if let Some(prev) = catch_up {
            if let Err(e) = self.full_propagate(&prev.client).await {
                tracing::warn!("catch-up from {} failed: {}", prev.path, e);
            }
        }
        if promoted {
            if let Err(e) = self.commit_local_dirty().await {
                tracing::warn!("commit sweep after tail promotion failed: {}", e);
            }
        }
        Ok(())
    }

    /// Applies a single-position neighbor push from the coordinator. Role
    /// bits follow from the positions: no predecessor means head, no
    /// successor means tail.
    pub async fn apply_neighbor_update(
        &self,
        pos: NeighborPos,
        path: &str,
    ) -> Result<(), NodeError> {
        let mut catch_up = None;
        let mut promoted = false;
        {
            let mut topo = self.topology.write().await;
            match pos {
                NeighborPos::Predecessor => {
                    if path.is_empty() {
                        topo.neighbors.remove(&NeighborPos::Predecessor);
                        topo.is_head = true;
                    } else if topo.neighbor(pos).map(|n| n.path.as_str()) != Some(path) {
                        let nbr = self.connect(path);
                        topo.neighbors.insert(pos, nbr.clone());
                        topo.is_head = false;
                        catch_up = Some(nbr);
                    }
                }
                NeighborPos::Successor => {
                    if path.is_empty() {
                        topo.neighbors.remove(&NeighborPos::Successor);
                        topo.neighbors.remove(&NeighborPos::Tail);
                        promoted = !topo.is_tail;
                        topo.is_tail = true;
                    } else {
                        topo.neighbors.insert(pos, self.connect(path));
                        topo.is_tail = false;
                    }
                }
                NeighborPos::Tail => {
                    if path.is_empty() || path == self.path {
                        topo.neighbors.remove(&NeighborPos::Tail);
                        promoted = !topo.is_tail;
                        topo.is_tail = true;
                    } else {
                        topo.neighbors.insert(pos, self.connect(path));
                        topo.is_tail = false;
                    }
                }
            }
            tracing::info!(
                "neighbor update: {:?} -> {:?}; role now {:?}",
                pos,
                path,
                topo.role()
            );
        }

        // Same rule as registration: the neighbor table is already updated,
        // so reconciliation failures are logged, not surfaced to the
        // coordinator.
        if let Some(prev) = catch_up {
            if let Err(e) = self.full_propagate(&prev.client).await {
                tracing::warn!("catch-up from {} failed: {}", prev.path, e);
            }
        }
        if promoted {
            if let Err(e) = self.commit_local_dirty().await {
                tracing::warn!("commit sweep after tail promotion failed: {}", e);
            }
        }
        Ok(())
    }

    /// Commits every local dirty item and back-propagates the commits. Run
    /// when this node becomes the tail, since the tail is the commit
    /// authority for the chain.
    async fn commit_local_dirty(&self) -> Result<(), NodeError> {
        let mut dirty = self.store.all_dirty()?;
        if dirty.is_empty() {
            return Ok(());
        }
        dirty.sort_by(|a, b| (&a.key, a.version).cmp(&(&b.key, b.version)));
        tracing::info!("committing {} dirty item(s) after tail promotion", dirty.len());

        let prev = self.topology().await.neighbor(NeighborPos::Predecessor).cloned();
        for item in dirty {
            self.store.commit(&item.key, item.version)?;
            self.notify_committed(&item.key, item.version);
            if let Some(prev) = &prev {
                self.backpropagate_commit(prev, &item.key, item.version);
            }
        }
        Ok(())
    }
}

fn propagate_request(items: &[Item]) -> PropagateRequest {
    let mut keys: HashMap<String, Vec<u64>> = HashMap::new();
    for item in items {
        keys.entry(item.key.clone()).or_default().push(item.version);
    }
    PropagateRequest { keys }
}

fn propagate_response(items: Vec<Item>) -> PropagateResponse {
    let mut out: HashMap<String, Vec<ItemPayload>> = HashMap::new();
    for item in items {
        let Item {
            key,
            version,
            committed,
            value,
        } = item;
        out.entry(key).or_default().push(ItemPayload {
            version,
            committed,
            value,
        });
    }
    PropagateResponse { items: out }
}
