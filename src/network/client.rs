//! Peer transport
//!
//! [`PeerClient`] is everything consensus needs from another node. The HTTP
//! implementation speaks the same JSON the API module serves.

use crate::core::ChainPage;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timeout for fetching a peer's full chain
pub const CHAIN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for notifications, registration and discovery
pub const GOSSIP_TIMEOUT: Duration = Duration::from_secs(2);

/// Peer communication errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {0} timed out")]
    Timeout(String),
    #[error("Peer {url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
}

/// Sent to every peer after a block is mined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNotification {
    /// Base URL of the node that mined the block
    #[serde(rename = "node_url", alias = "sender_url")]
    pub sender_url: String,
    pub block_index: u64,
    pub block_hash: String,
}

/// Body of `/nodes/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodes {
    pub nodes: Vec<String>,
}

/// Body of `/nodes/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerList {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub count: usize,
}

/// Calls this node makes on its peers
pub trait PeerClient: Send + Sync {
    /// Full chain of `peer`
    fn fetch_chain<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<ChainPage, PeerError>>;

    /// Tell `peer` about a newly mined block
    fn notify_block<'a>(
        &'a self,
        peer: &'a str,
        notification: &'a BlockNotification,
    ) -> BoxFuture<'a, Result<(), PeerError>>;

    /// Peers known to `peer`
    fn list_peers<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<Vec<String>, PeerError>>;

    /// Ask `peer` to register `self_url`
    fn announce<'a>(&'a self, peer: &'a str, self_url: &'a str)
        -> BoxFuture<'a, Result<(), PeerError>>;
}

/// [`PeerClient`] over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
    chain_timeout: Duration,
    gossip_timeout: Duration,
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new(CHAIN_FETCH_TIMEOUT, GOSSIP_TIMEOUT)
    }
}

impl HttpPeerClient {
    pub fn new(chain_timeout: Duration, gossip_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            chain_timeout,
            gossip_timeout,
        }
    }

    fn classify(url: &str, source: reqwest::Error) -> PeerError {
        if source.is_timeout() {
            PeerError::Timeout(url.to_string())
        } else {
            PeerError::Request {
                url: url.to_string(),
                source,
            }
        }
    }

    async fn send(
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PeerError> {
        let response = request.send().await.map_err(|e| Self::classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl PeerClient for HttpPeerClient {
    fn fetch_chain<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<ChainPage, PeerError>> {
        Box::pin(async move {
            let url = format!("{}/blockchain", peer);
            let request = self.client.get(&url).timeout(self.chain_timeout);
            let response = Self::send(&url, request).await?;
            response
                .json::<ChainPage>()
                .await
                .map_err(|e| Self::classify(&url, e))
        })
    }

    fn notify_block<'a>(
        &'a self,
        peer: &'a str,
        notification: &'a BlockNotification,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        Box::pin(async move {
            let url = format!("{}/block/notify/{}", peer, notification.block_index);
            let request = self
                .client
                .post(&url)
                .json(notification)
                .timeout(self.gossip_timeout);
            Self::send(&url, request).await.map(|_| ())
        })
    }

    fn list_peers<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<Vec<String>, PeerError>> {
        Box::pin(async move {
            let url = format!("{}/nodes/list", peer);
            let request = self.client.get(&url).timeout(self.gossip_timeout);
            let response = Self::send(&url, request).await?;
            let list = response
                .json::<PeerList>()
                .await
                .map_err(|e| Self::classify(&url, e))?;
            Ok(list.nodes)
        })
    }

    fn announce<'a>(
        &'a self,
        peer: &'a str,
        self_url: &'a str,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        Box::pin(async move {
            let url = format!("{}/nodes/register", peer);
            let body = RegisterNodes {
                nodes: vec![self_url.to_string()],
            };
            let request = self.client.post(&url).json(&body).timeout(self.gossip_timeout);
            Self::send(&url, request).await.map(|_| ())
        })
    }
}
