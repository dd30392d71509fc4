//! Longest-valid-chain consensus
//!
//! The agent pulls peer chains, adopts the longest valid one that is
//! strictly longer than the local chain, gossips freshly mined blocks and
//! keeps the peer registry growing.
//!
//! Two entry points replace the chain:
//! - [`ConsensusAgent::resolve_conflicts`] and
//!   [`ConsensusAgent::fetch_from_peer`] stop an active miner, replace,
//!   and restart it with the same job unless the ledger is paused
//! - [`ConsensusAgent::serve_presync`] answers the miner's own pre-mining
//!   sync requests; the miner is parked waiting for the answer, so the
//!   chain is replaced without touching it

use crate::core::{validate_external_chain, Block, LedgerError};
use crate::mining::{Miner, SharedLedger, SyncRequest};
use crate::network::client::{BlockNotification, PeerClient};
use crate::network::peer::PeerRegistry;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

const BLOCKS_LOG: &str = "node::blocks";
const REGISTRATION_LOG: &str = "node::registration";

/// Answer to a block notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationOutcome {
    /// The sender is ahead; a fetch from it has been started
    WillSync { our_index: u64, your_index: u64 },
    UpToDate { our_index: u64 },
}

/// Result of registering a batch of peers
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub added: usize,
    pub peers: Vec<String>,
}

/// A validated candidate chain and where it came from
struct Candidate {
    source: String,
    chain: Vec<Block>,
}

/// Drives chain synchronisation with the peer set
pub struct ConsensusAgent {
    ledger: SharedLedger,
    miner: Arc<Miner>,
    peers: Arc<PeerRegistry>,
    client: Arc<dyn PeerClient>,
}

impl ConsensusAgent {
    pub fn new(
        ledger: SharedLedger,
        miner: Arc<Miner>,
        peers: Arc<PeerRegistry>,
        client: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            ledger,
            miner,
            peers,
            client,
        }
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Fetch `peer`'s chain if it is valid and longer than `min_length`
    async fn candidate_from(&self, peer: &str, min_length: usize) -> Option<Candidate> {
        let page = match self.client.fetch_chain(peer).await {
            Ok(page) => page,
            Err(e) => {
                log::warn!("Error getting blockchain from {}: {}", peer, e);
                return None;
            }
        };

        if page.chain.len() <= min_length {
            return None;
        }
        if let Err(violation) = validate_external_chain(&page.chain) {
            log::error!("Rejecting chain from {}: {}", peer, violation);
            return None;
        }

        log::info!(
            "External chain with {} blocks from {} validated successfully",
            page.chain.len(),
            peer
        );
        Some(Candidate {
            source: peer.to_string(),
            chain: page.chain,
        })
    }

    /// Longest valid peer chain strictly longer than ours
    async fn best_candidate(&self) -> Option<Candidate> {
        let mut best_length = self.ledger.read().await.len();
        let mut best = None;

        for peer in self.peers.list().await {
            if let Some(candidate) = self.candidate_from(&peer, best_length).await {
                log::info!(
                    "Found longer valid chain from {} with length {}",
                    peer,
                    candidate.chain.len()
                );
                best_length = candidate.chain.len();
                best = Some(candidate);
            }
        }

        best
    }

    /// Replace the local chain if the candidate is still longer
    async fn adopt(&self, candidate: Candidate) -> Result<bool, LedgerError> {
        let mut ledger = self.ledger.write().await;
        let current_length = ledger.len();
        if candidate.chain.len() <= current_length {
            log::debug!("Chain from {} no longer longer than ours", candidate.source);
            return Ok(false);
        }

        log::info!(
            target: BLOCKS_LOG,
            "Importing {} new blocks from node {}",
            candidate.chain.len() - current_length,
            candidate.source
        );
        for block in &candidate.chain[current_length..] {
            let hash_prefix: String = block.hash.chars().take(10).collect();
            log::info!(
                target: BLOCKS_LOG,
                "Block #{} from peer {} - Hash: {}... | Mined by: {} | Transactions: {}",
                block.index,
                candidate.source,
                hash_prefix,
                block.miner().unwrap_or("unknown"),
                block.tx_count()
            );
        }

        log::info!(
            "Replacing local chain (length: {}) with network chain (length: {})",
            current_length,
            candidate.chain.len()
        );
        ledger.replace_chain(candidate.chain)?;
        Ok(true)
    }

    /// Adopt with the miner stopped, restarting it afterwards unless the
    /// ledger was paused in the meantime
    async fn adopt_with_miner_stopped(&self, candidate: Candidate) -> Result<bool, LedgerError> {
        let was_mining = self.miner.is_running().await;
        if was_mining {
            log::info!("Temporarily stopping mining to update blockchain");
            self.miner.stop().await;
        }

        let result = self.adopt(candidate).await;

        if was_mining {
            let paused = self.ledger.read().await.is_paused();
            if paused {
                log::info!("Ledger paused, not restarting mining");
                return result;
            }
            if let Some(address) = self.miner.current_address().await {
                log::info!("Restarting mining with address {}", address);
            }
            self.miner.restart().await;
        }
        result
    }

    /// Adopt the longest valid peer chain, if any is longer than ours.
    ///
    /// Returns true if the local chain was replaced. Equal length never
    /// replaces.
    pub async fn resolve_conflicts(&self) -> Result<bool, LedgerError> {
        match self.best_candidate().await {
            Some(candidate) => self.adopt_with_miner_stopped(candidate).await,
            None => {
                log::debug!("Local chain is authoritative, no consensus action needed");
                Ok(false)
            }
        }
    }

    /// Sync on behalf of the miner, which is waiting on the answer
    pub async fn sync_for_miner(&self) -> bool {
        if self.peers.is_empty().await {
            return false;
        }
        let Some(candidate) = self.best_candidate().await else {
            return false;
        };
        match self.adopt(candidate).await {
            Ok(replaced) => {
                if replaced {
                    log::info!("Blockchain updated with network consensus before mining");
                }
                replaced
            }
            Err(e) => {
                log::error!("Error during pre-mining sync: {}", e);
                false
            }
        }
    }

    /// Answer pre-mining sync requests until the channel closes
    pub async fn serve_presync(self: Arc<Self>, mut requests: mpsc::Receiver<SyncRequest>) {
        while let Some(request) = requests.recv().await {
            let replaced = self.sync_for_miner().await;
            // The miner may have been stopped while waiting.
            let _ = request.reply.send(replaced);
        }
    }

    /// Fetch and adopt `peer_url`'s chain if it is valid and longer
    pub async fn fetch_from_peer(&self, peer_url: &str) -> bool {
        let current_length = self.ledger.read().await.len();
        let Some(candidate) = self.candidate_from(peer_url, current_length).await else {
            return false;
        };

        log::info!(
            target: BLOCKS_LOG,
            "Received notification for new block(s) from {}",
            peer_url
        );
        match self.adopt_with_miner_stopped(candidate).await {
            Ok(replaced) => replaced,
            Err(e) => {
                log::error!("Error replacing chain from {}: {}", peer_url, e);
                false
            }
        }
    }

    /// React to a peer announcing block `block_index`.
    ///
    /// If the sender is ahead, a fetch from that sender alone is spawned.
    pub async fn handle_block_notification(
        self: &Arc<Self>,
        block_index: u64,
        notification: BlockNotification,
    ) -> NotificationOutcome {
        let our_index = self.ledger.read().await.latest_block().index;

        if block_index <= our_index {
            return NotificationOutcome::UpToDate { our_index };
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.fetch_from_peer(&notification.sender_url).await;
        });
        NotificationOutcome::WillSync {
            our_index,
            your_index: block_index,
        }
    }

    /// Tell every peer about a freshly mined block
    pub async fn broadcast_new_block(&self, block: &Block) {
        let peers = self.peers.list().await;
        if peers.is_empty() {
            log::debug!("No peers to broadcast new block to");
            return;
        }

        let notification = BlockNotification {
            sender_url: self.peers.self_url().to_string(),
            block_index: block.index,
            block_hash: block.hash.clone(),
        };
        log::info!(
            "Broadcasting new block #{} to {} peers",
            block.index,
            peers.len()
        );

        let sends = peers.iter().map(|peer| {
            let notification = &notification;
            async move {
                match self.client.notify_block(peer, notification).await {
                    Ok(()) => log::debug!("Notified {} about new block #{}", peer, block.index),
                    Err(e) => log::warn!("Failed to notify {} about new block: {}", peer, e),
                }
            }
        });
        join_all(sends).await;
    }

    /// Register peers, then announce this node to every known peer.
    ///
    /// Announcements only go out when something new was registered, so two
    /// nodes introducing themselves to each other settle after one exchange.
    pub async fn register_peers(&self, addresses: &[String]) -> RegistrationOutcome {
        let mut added = 0;
        for address in addresses {
            if self.peers.register(address).await {
                added += 1;
            }
        }

        let peers = self.peers.list().await;
        if added > 0 {
            let self_url = self.peers.self_url();
            let announcements = peers.iter().map(|peer| async move {
                if let Err(e) = self.client.announce(peer, self_url).await {
                    log::debug!(target: REGISTRATION_LOG, "Could not announce to {}: {}", peer, e);
                }
            });
            join_all(announcements).await;

            log::info!(
                target: REGISTRATION_LOG,
                "Added {} new nodes, total nodes: {}",
                added,
                peers.len()
            );
        }
        RegistrationOutcome { added, peers }
    }

    /// Ask every known peer for its peers and register the new ones
    pub async fn discover_peers(&self) -> usize {
        let mut added = 0;
        for peer in self.peers.list().await {
            match self.client.list_peers(&peer).await {
                Ok(nodes) => {
                    for node in nodes {
                        if self.peers.register(&node).await {
                            added += 1;
                        }
                    }
                }
                Err(e) => log::warn!("Peer {} unreachable during discovery: {}", peer, e),
            }
        }

        if added > 0 {
            log::info!(
                target: REGISTRATION_LOG,
                "Discovered {} new nodes, total nodes: {}",
                added,
                self.peers.len().await
            );
        }
        added
    }
}
