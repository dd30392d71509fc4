//! Multi-node scenarios over the public API

use futures::future::BoxFuture;
use powchain::core::{ChainPage, GENESIS_ADDRESS};
use powchain::network::{BlockNotification, PeerClient, PeerError};
use powchain::{create_router, ApiState, Node, NodeConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;

/// Routes peer calls straight to in-process nodes
#[derive(Default)]
struct LocalNetwork {
    nodes: Mutex<HashMap<String, Weak<Node>>>,
}

impl LocalNetwork {
    fn join(&self, node: &Arc<Node>) {
        self.nodes
            .lock()
            .unwrap()
            .insert(node.config.url(), Arc::downgrade(node));
    }

    fn node(&self, url: &str) -> Result<Arc<Node>, PeerError> {
        self.nodes
            .lock()
            .unwrap()
            .get(url)
            .and_then(Weak::upgrade)
            .ok_or_else(|| PeerError::Timeout(url.to_string()))
    }
}

impl PeerClient for LocalNetwork {
    fn fetch_chain<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<ChainPage, PeerError>> {
        Box::pin(async move {
            let node = self.node(peer)?;
            Ok(node.get_chain(0, None).await)
        })
    }

    fn notify_block<'a>(
        &'a self,
        peer: &'a str,
        notification: &'a BlockNotification,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        Box::pin(async move {
            let node = self.node(peer)?;
            node.handle_block_notification(notification.block_index, notification.clone())
                .await;
            Ok(())
        })
    }

    fn list_peers<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<Vec<String>, PeerError>> {
        Box::pin(async move {
            let node = self.node(peer)?;
            Ok(node.list_peers().await)
        })
    }

    fn announce<'a>(
        &'a self,
        peer: &'a str,
        self_url: &'a str,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        Box::pin(async move {
            let node = self.node(peer)?;
            node.register_peers(&[self_url.to_string()]).await;
            Ok(())
        })
    }
}

fn config(dir: &TempDir, port: u16) -> NodeConfig {
    NodeConfig {
        port,
        data_dir: dir.path().to_path_buf(),
        difficulty: 1,
        ..Default::default()
    }
}

async fn local_node(network: &Arc<LocalNetwork>, dir: &TempDir, port: u16) -> Arc<Node> {
    let client: Arc<dyn PeerClient> = network.clone();
    let node = Arc::new(Node::with_client(config(dir, port), client).await.unwrap());
    network.join(&node);
    node
}

async fn chain_length(node: &Node) -> usize {
    node.get_chain(0, None).await.length
}

async fn wait_for_length(node: &Node, length: usize) -> bool {
    for _ in 0..100 {
        if chain_length(node).await == length {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_registration_is_mutual() {
    let network = Arc::new(LocalNetwork::default());
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = local_node(&network, &dir_a, 7001).await;
    let b = local_node(&network, &dir_b, 7002).await;

    let outcome = b.register_peers(&[a.config.url()]).await;
    assert_eq!(outcome.added, 1);

    assert_eq!(a.list_peers().await, vec![b.config.url()]);
    assert_eq!(b.list_peers().await, vec![a.config.url()]);
}

#[tokio::test]
async fn test_follower_adopts_longest_chain() {
    let network = Arc::new(LocalNetwork::default());
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = local_node(&network, &dir_a, 7011).await;
    let b = local_node(&network, &dir_b, 7012).await;

    for _ in 0..3 {
        a.mine("alice").await.unwrap();
    }
    b.mine("bob").await.unwrap();

    b.register_peers(&[a.config.url()]).await;
    assert!(b.resolve_conflicts().await.unwrap());

    assert_eq!(chain_length(&b).await, 4);
    assert_eq!(b.get_balance("alice").await, 300.0);
    assert_eq!(b.get_balance("bob").await, 0.0);
    assert_eq!(
        b.get_block_by_index(3).await.unwrap().hash,
        a.get_block_by_index(3).await.unwrap().hash
    );

    // A already holds the longest chain.
    assert!(!a.resolve_conflicts().await.unwrap());
    assert_eq!(chain_length(&a).await, 4);
}

#[tokio::test]
async fn test_equal_length_keeps_local_chain() {
    let network = Arc::new(LocalNetwork::default());
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = local_node(&network, &dir_a, 7021).await;
    let b = local_node(&network, &dir_b, 7022).await;

    a.mine("alice").await.unwrap();
    let ours = b.mine("bob").await.unwrap().block;

    b.register_peers(&[a.config.url()]).await;
    assert!(!b.resolve_conflicts().await.unwrap());
    assert_eq!(b.get_block_by_index(1).await.unwrap().hash, ours.hash);
}

#[tokio::test]
async fn test_mined_block_notification_pulls_chain() {
    let network = Arc::new(LocalNetwork::default());
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = local_node(&network, &dir_a, 7031).await;
    let b = local_node(&network, &dir_b, 7032).await;
    a.register_peers(&[b.config.url()]).await;

    a.mine("alice").await.unwrap();
    assert!(wait_for_length(&b, 2).await);

    a.mine("alice").await.unwrap();
    assert!(wait_for_length(&b, 3).await);
    assert_eq!(b.get_balance("alice").await, 200.0);
}

#[tokio::test]
async fn test_unconfirmed_transfer_survives_replacement() {
    let network = Arc::new(LocalNetwork::default());
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = local_node(&network, &dir_a, 7041).await;
    let b = local_node(&network, &dir_b, 7042).await;

    let tx_id = b
        .submit_transaction(GENESIS_ADDRESS, "carol", 5.0, None)
        .await
        .unwrap();
    for _ in 0..2 {
        a.mine("alice").await.unwrap();
    }

    b.register_peers(&[a.config.url()]).await;
    assert!(b.resolve_conflicts().await.unwrap());

    let pending = b.pending_transactions().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, tx_id);

    b.mine("bob").await.unwrap();
    assert_eq!(b.get_balance("carol").await, 5.0);
    assert!(b.pending_transactions().await.is_empty());
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let network = Arc::new(LocalNetwork::default());
    let dir = TempDir::new().unwrap();

    let tip = {
        let node = local_node(&network, &dir, 7051).await;
        node.mine("alice").await.unwrap();
        let tip = node.mine("alice").await.unwrap().block;
        node.shutdown().await;
        tip
    };

    let node = local_node(&network, &dir, 7051).await;
    assert_eq!(chain_length(&node).await, 3);
    assert_eq!(node.get_block_by_index(2).await.unwrap().hash, tip.hash);
    assert_eq!(node.get_balance("alice").await, 200.0);
    assert!(node.validate().await.valid);
}

/// Bind an ephemeral port and serve a node's API on it
async fn serve_node(dir: &TempDir) -> Arc<Node> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let node = Arc::new(Node::new(config(dir, port)).await.unwrap());
    let app = create_router(ApiState::new(node.clone()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    node
}

#[tokio::test]
async fn test_consensus_over_http() {
    let (dir_a, dir_b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let a = serve_node(&dir_a).await;
    let b = serve_node(&dir_b).await;

    for _ in 0..2 {
        a.mine("alice").await.unwrap();
    }

    let outcome = b.register_peers(&[a.config.url()]).await;
    assert_eq!(outcome.added, 1);
    assert_eq!(a.list_peers().await, vec![b.config.url()]);

    assert!(b.resolve_conflicts().await.unwrap());
    assert_eq!(chain_length(&b).await, 3);

    a.mine("alice").await.unwrap();
    assert!(wait_for_length(&b, 4).await);
    assert_eq!(b.get_balance("alice").await, 300.0);
}
