//! Typed HTTP client for talking to another replica in the chain.
//!
//! One `NodeClient` wraps one neighbor path. Calls are single-shot: a failed
//! call is reported to the caller and repaired by the next coordinator event,
//! never retried inline.

use anyhow::Result;

use super::protocol::{
    Ack, CommitRequest, ENDPOINT_BACK_PROPAGATE, ENDPOINT_COMMIT, ENDPOINT_FORWARD,
    ENDPOINT_FWD_PROPAGATE, ENDPOINT_ITEM, ENDPOINT_LATEST, ForwardWriteRequest, ItemPayload,
    ItemRequest, ItemResponse, LatestVersionRequest, LatestVersionResponse, PropagateRequest,
    PropagateResponse,
};

/// Client handle for one neighbor. Cheap to clone; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    path: String,
}

impl NodeClient {
    pub fn new(http: reqwest::Client, path: &str) -> Self {
        Self {
            http,
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn url(&self, endpoint: &str) -> String {
        format!("http://{}{}", self.path, endpoint)
    }

    async fn post_ack<T: serde::Serialize>(&self, endpoint: &str, payload: &T) -> Result<()> {
        let response = self
            .http
            .post(self.url(endpoint))
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("{} to {} failed: {}", endpoint, self.path, response.status());
        }
        let ack: Ack = response.json().await?;
        if !ack.success {
            anyhow::bail!("{} to {} was not acknowledged", endpoint, self.path);
        }
        Ok(())
    }

    /// Forwards a dirty item to this neighbor (predecessor → successor).
    pub async fn write(&self, key: &str, value: &[u8], version: u64) -> Result<()> {
        let payload = ForwardWriteRequest {
            key: key.to_string(),
            value: value.to_vec(),
            version,
        };
        self.post_ack(ENDPOINT_FORWARD, &payload).await
    }

    /// Sends a commit acknowledgment to this neighbor (successor → predecessor).
    pub async fn commit(&self, key: &str, version: u64) -> Result<()> {
        let payload = CommitRequest {
            key: key.to_string(),
            version,
        };
        self.post_ack(ENDPOINT_COMMIT, &payload).await
    }

    /// Asks the tail for its newest committed version of a key.
    pub async fn latest_version(&self, key: &str) -> Result<Option<u64>> {
        let payload = LatestVersionRequest {
            key: key.to_string(),
        };
        let response = self
            .http
            .post(self.url(ENDPOINT_LATEST))
            .json(&payload)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("version query to {} failed: {}", self.path, response.status());
        }
        let body: LatestVersionResponse = response.json().await?;
        Ok(body.version)
    }

    /// Fetches one exact (key, version) item from this neighbor.
    pub async fn read_version(&self, key: &str, version: u64) -> Result<Option<ItemPayload>> {
        let payload = ItemRequest {
            key: key.to_string(),
            version,
        };
        let response = self
            .http
            .post(self.url(ENDPOINT_ITEM))
            .json(&payload)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("item fetch from {} failed: {}", self.path, response.status());
        }
        let body: ItemResponse = response.json().await?;
        Ok(body.item)
    }

    async fn propagate(&self, endpoint: &str, req: &PropagateRequest) -> Result<PropagateResponse> {
        let response = self.http.post(self.url(endpoint)).json(req).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("{} to {} failed: {}", endpoint, self.path, response.status());
        }
        Ok(response.json().await?)
    }

    /// Asks the predecessor for dirty items we are missing.
    pub async fn fwd_propagate(&self, req: &PropagateRequest) -> Result<PropagateResponse> {
        self.propagate(ENDPOINT_FWD_PROPAGATE, req).await
    }

    /// Asks the predecessor for committed items we are missing.
    pub async fn back_propagate(&self, req: &PropagateRequest) -> Result<PropagateResponse> {
        self.propagate(ENDPOINT_BACK_PROPAGATE, req).await
    }
}
