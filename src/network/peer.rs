//! Peer registry
//!
//! Known peers are kept as normalized base URLs (`scheme://host[:port]`).

use crate::network::client::PeerError;
use reqwest::Url;
use std::collections::BTreeSet;
use tokio::sync::RwLock;

const REGISTRATION_LOG: &str = "node::registration";

/// Reduce a peer address to `scheme://host[:port]`.
///
/// A bare `host:port` is read as `http://host:port`; paths and queries are
/// dropped.
pub fn normalize_peer_url(address: &str) -> Result<String, PeerError> {
    let address = address.trim();
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&candidate).map_err(|_| PeerError::InvalidAddress(address.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PeerError::InvalidAddress(address.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// The set of peers this node talks to
#[derive(Debug)]
pub struct PeerRegistry {
    self_url: String,
    peers: RwLock<BTreeSet<String>>,
}

impl PeerRegistry {
    /// Create an empty registry for the node reachable at `self_url`
    pub fn new(self_url: &str) -> Self {
        Self {
            self_url: normalize_peer_url(self_url).unwrap_or_else(|_| self_url.to_string()),
            peers: RwLock::new(BTreeSet::new()),
        }
    }

    /// This node's own URL
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Add a peer; false if it is malformed, this node or already known
    pub async fn register(&self, address: &str) -> bool {
        let url = match normalize_peer_url(address) {
            Ok(url) => url,
            Err(e) => {
                log::debug!(target: REGISTRATION_LOG, "{}", e);
                return false;
            }
        };
        if url == self.self_url {
            return false;
        }

        let added = self.peers.write().await.insert(url.clone());
        if added {
            log::debug!(target: REGISTRATION_LOG, "Registered peer node: {}", url);
        }
        added
    }

    /// Snapshot of all known peers
    pub async fn list(&self) -> Vec<String> {
        self.peers.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_peer_url("http://127.0.0.1:5001/chain?x=1").unwrap(),
            "http://127.0.0.1:5001"
        );
        assert_eq!(normalize_peer_url("localhost:5002").unwrap(), "http://localhost:5002");
        assert_eq!(normalize_peer_url("https://node.example").unwrap(), "https://node.example");
        assert!(normalize_peer_url("http://").is_err());
        assert!(normalize_peer_url("").is_err());
    }

    #[tokio::test]
    async fn test_register_rejects_self_and_duplicates() {
        let registry = PeerRegistry::new("http://127.0.0.1:5000");

        assert!(!registry.register("http://127.0.0.1:5000").await);
        assert!(!registry.register("127.0.0.1:5000").await);
        assert!(registry.register("http://127.0.0.1:5001").await);
        assert!(!registry.register("http://127.0.0.1:5001/").await);
        assert!(registry.register("127.0.0.1:5002").await);

        assert_eq!(
            registry.list().await,
            vec!["http://127.0.0.1:5001".to_string(), "http://127.0.0.1:5002".to_string()]
        );
        assert_eq!(registry.len().await, 2);
    }
}
