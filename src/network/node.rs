//! Node implementation
//!
//! The node owns the shared ledger, the miner, the peer registry and the
//! consensus agent, and runs the background loops that tie them together.

use crate::core::{
    Block, ChainPage, CheckpointRestore, HistoryEntry, Ledger, LedgerConfig, LedgerError,
    LedgerStats, ResumeOutcome, Transaction, TransactionError, ValidationReport,
};
use crate::mining::{mine_detached, MinedBlock, Miner, MiningError, MiningJob, SharedLedger};
use crate::network::client::{BlockNotification, HttpPeerClient, PeerClient};
use crate::network::consensus::{ConsensusAgent, NotificationOutcome, RegistrationOutcome};
use crate::network::peer::PeerRegistry;
use crate::storage::{CheckpointConfig, CheckpointMetadata};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Capacity of the mined-block and presync channels
const CHANNEL_CAPACITY: usize = 32;

/// Node-level errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Mining(#[from] MiningError),
    #[error("Ledger is paused")]
    Paused,
    #[error("Mining was cancelled")]
    MiningCancelled,
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface the API listens on
    pub host: String,
    /// Port the API listens on
    pub port: u16,
    /// URL peers should use to reach this node; derived from host and port if unset
    pub advertised_url: Option<String>,
    /// Peers to register at startup
    pub bootstrap_peers: Vec<String>,
    /// Checkpoint directory
    pub data_dir: PathBuf,
    /// Difficulty of a freshly created ledger
    pub difficulty: u32,
    /// Delay before the first consensus round
    pub consensus_delay: Duration,
    pub consensus_interval: Duration,
    pub discovery_interval: Duration,
    /// Wait after a failed discovery round
    pub discovery_retry: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            advertised_url: None,
            bootstrap_peers: Vec::new(),
            data_dir: PathBuf::from(".powchain_data"),
            difficulty: crate::core::DEFAULT_DIFFICULTY,
            consensus_delay: Duration::from_secs(5),
            consensus_interval: Duration::from_secs(10),
            discovery_interval: Duration::from_secs(300),
            discovery_retry: Duration::from_secs(60),
        }
    }
}

impl NodeConfig {
    /// URL this node announces to its peers
    pub fn url(&self) -> String {
        self.advertised_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            checkpoint: Some(CheckpointConfig::in_dir(&self.data_dir)),
            ..Default::default()
        }
    }
}

/// Summary served at `/node/info`
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub url: String,
    pub peers: Vec<String>,
    pub chain_length: usize,
    pub difficulty: u32,
    pub pending_transactions: usize,
    pub mining: bool,
    pub paused: bool,
}

/// Ledger statistics plus the miner's state
#[derive(Debug, Clone, Serialize)]
pub struct MiningOverview {
    #[serde(flatten)]
    pub ledger: LedgerStats,
    pub mining_active: bool,
    pub miner_address: Option<String>,
}

/// A ledger node
pub struct Node {
    pub config: NodeConfig,
    pub node_id: String,
    pub ledger: SharedLedger,
    pub miner: Arc<Miner>,
    pub peers: Arc<PeerRegistry>,
    pub consensus: Arc<ConsensusAgent>,
    events_tx: mpsc::Sender<MinedBlock>,
    presync_tx: mpsc::Sender<crate::mining::SyncRequest>,
}

impl Node {
    /// Create a node talking HTTP to its peers
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::with_client(config, Arc::new(HttpPeerClient::default())).await
    }

    /// Create a node with a custom peer transport.
    ///
    /// Spawns the tasks that gossip mined blocks and answer the miner's
    /// presync requests; must be called inside a tokio runtime.
    pub async fn with_client(
        config: NodeConfig,
        client: Arc<dyn PeerClient>,
    ) -> Result<Self, NodeError> {
        let ledger = Ledger::new(config.ledger_config())?;
        Ok(Self::with_ledger(config, ledger, client))
    }

    /// Assemble a node around an existing ledger
    pub fn with_ledger(config: NodeConfig, ledger: Ledger, client: Arc<dyn PeerClient>) -> Self {
        let node_id = hex::encode(rand::random::<[u8; 8]>());
        let ledger = Arc::new(RwLock::new(ledger));
        let miner = Arc::new(Miner::new(ledger.clone()));
        let peers = Arc::new(PeerRegistry::new(&config.url()));
        let consensus = Arc::new(ConsensusAgent::new(
            ledger.clone(),
            miner.clone(),
            peers.clone(),
            client,
        ));

        let (events_tx, mut events_rx) = mpsc::channel::<MinedBlock>(CHANNEL_CAPACITY);
        let broadcaster = consensus.clone();
        tokio::spawn(async move {
            while let Some(mined) = events_rx.recv().await {
                log::info!(
                    target: "node::blocks",
                    "Successfully mined block #{}, hash: {}",
                    mined.block.index,
                    mined.block.hash
                );
                broadcaster.broadcast_new_block(&mined.block).await;
            }
        });

        let (presync_tx, presync_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(consensus.clone().serve_presync(presync_rx));

        log::info!("Node {} created at {}", node_id, config.url());
        Self {
            config,
            node_id,
            ledger,
            miner,
            peers,
            consensus,
            events_tx,
            presync_tx,
        }
    }

    /// Register bootstrap peers and spawn the consensus and discovery loops
    pub async fn start_background(&self) -> Vec<JoinHandle<()>> {
        if !self.config.bootstrap_peers.is_empty() {
            self.consensus
                .register_peers(&self.config.bootstrap_peers)
                .await;
        }

        let consensus = self.consensus.clone();
        let delay = self.config.consensus_delay;
        let interval = self.config.consensus_interval;
        let consensus_loop = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                if !consensus.peers().is_empty().await {
                    log::debug!("Running periodic consensus check");
                    match consensus.resolve_conflicts().await {
                        Ok(true) => log::info!("Chain updated through periodic consensus"),
                        Ok(false) => {}
                        Err(e) => log::error!("Error in periodic consensus: {}", e),
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        let consensus = self.consensus.clone();
        let interval = self.config.discovery_interval;
        let retry = self.config.discovery_retry;
        let discovery_loop = tokio::spawn(async move {
            loop {
                consensus.discover_peers().await;
                let wait = if consensus.peers().is_empty().await {
                    retry
                } else {
                    interval
                };
                tokio::time::sleep(wait).await;
            }
        });

        log::info!("Node started at {}", self.config.url());
        vec![consensus_loop, discovery_loop]
    }

    /// Stop mining and write a final checkpoint
    pub async fn shutdown(&self) {
        log::info!("Node shutting down...");
        if self.miner.is_running().await {
            self.miner.stop().await;
        }
        if let Err(e) = self.ledger.read().await.create_checkpoint("Node shutdown") {
            log::error!("Failed to write shutdown checkpoint: {}", e);
        }
    }

    // =========================================================================
    // Transactions and queries
    // =========================================================================

    pub async fn submit_transaction(
        &self,
        sender: &str,
        recipient: &str,
        amount: f64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<String, NodeError> {
        Ok(self
            .ledger
            .write()
            .await
            .submit_transaction(sender, recipient, amount, metadata)?)
    }

    pub async fn get_balance(&self, address: &str) -> f64 {
        self.ledger.read().await.get_balance(address)
    }

    pub async fn get_chain(&self, start: usize, limit: Option<usize>) -> ChainPage {
        self.ledger.read().await.get_chain(start, limit)
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        self.ledger.read().await.get_block_by_hash(hash).cloned()
    }

    pub async fn get_block_by_index(&self, index: u64) -> Option<Block> {
        self.ledger.read().await.get_block_by_index(index).cloned()
    }

    pub async fn get_transaction_history(&self, address: &str) -> Vec<HistoryEntry> {
        self.ledger.read().await.get_transaction_history(address)
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.read().await.pending_transactions().to_vec()
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// Mine one block now and gossip it
    pub async fn mine(&self, miner_address: &str) -> Result<MinedBlock, NodeError> {
        if self.ledger.read().await.is_paused() {
            return Err(NodeError::Paused);
        }
        let mined = mine_detached(&self.ledger, miner_address, Arc::new(AtomicBool::new(false)))
            .await?
            .ok_or(NodeError::MiningCancelled)?;
        self.consensus.broadcast_new_block(&mined.block).await;
        Ok(mined)
    }

    /// Start continuous mining; `Ok(false)` if it was already running
    pub async fn start_mining(&self, miner_address: &str) -> Result<bool, NodeError> {
        if self.ledger.read().await.is_paused() {
            log::warn!("Refusing to start mining while the ledger is paused");
            return Err(NodeError::Paused);
        }
        let job = MiningJob::new(miner_address)
            .with_events(self.events_tx.clone())
            .with_presync(self.presync_tx.clone());
        Ok(self.miner.start(job).await)
    }

    pub async fn stop_mining(&self) -> bool {
        self.miner.stop().await
    }

    pub async fn mining_stats(&self) -> MiningOverview {
        let ledger = self.ledger.read().await.stats();
        MiningOverview {
            ledger,
            mining_active: self.miner.is_running().await,
            miner_address: self.miner.current_address().await,
        }
    }

    pub async fn set_difficulty(&self, difficulty: u32) -> u32 {
        let mut ledger = self.ledger.write().await;
        ledger.set_difficulty(difficulty);
        ledger.difficulty()
    }

    // =========================================================================
    // Peers
    // =========================================================================

    pub async fn register_peers(&self, addresses: &[String]) -> RegistrationOutcome {
        self.consensus.register_peers(addresses).await
    }

    pub async fn list_peers(&self) -> Vec<String> {
        self.peers.list().await
    }

    pub async fn resolve_conflicts(&self) -> Result<bool, NodeError> {
        Ok(self.consensus.resolve_conflicts().await?)
    }

    pub async fn handle_block_notification(
        &self,
        block_index: u64,
        notification: BlockNotification,
    ) -> NotificationOutcome {
        self.consensus
            .handle_block_notification(block_index, notification)
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop mining, then checkpoint and pause the ledger
    pub async fn pause(&self, reason: &str) -> Result<CheckpointMetadata, NodeError> {
        if self.miner.is_running().await {
            self.miner.stop().await;
        }
        Ok(self.ledger.write().await.pause(reason)?)
    }

    /// Restore from the checkpoint and clear the paused flag
    pub async fn resume(&self, validate: bool) -> Result<ResumeOutcome, NodeError> {
        Ok(self.ledger.write().await.resume(validate)?)
    }

    pub async fn create_checkpoint(&self, reason: &str) -> Result<CheckpointMetadata, NodeError> {
        Ok(self.ledger.read().await.create_checkpoint(reason)?)
    }

    pub async fn load_checkpoint(&self, validate: bool) -> Result<CheckpointRestore, NodeError> {
        Ok(self.ledger.write().await.load_checkpoint(validate)?)
    }

    pub async fn validate(&self) -> ValidationReport {
        self.ledger.read().await.comprehensive_validation()
    }

    // =========================================================================
    // Contracts
    // =========================================================================

    pub async fn deploy_contract(
        &self,
        code: &str,
        owner: &str,
        initial_balance: f64,
    ) -> Result<String, NodeError> {
        Ok(self
            .ledger
            .write()
            .await
            .deploy_contract(code, owner, initial_balance)?)
    }

    pub async fn call_contract(
        &self,
        contract_id: &str,
        method: &str,
        sender: &str,
        args: Vec<Value>,
        value: f64,
    ) -> Result<Value, NodeError> {
        Ok(self
            .ledger
            .write()
            .await
            .call_contract(contract_id, method, sender, args, value)?)
    }

    pub async fn get_contract_state(&self, contract_id: &str) -> Result<Value, NodeError> {
        Ok(self.ledger.read().await.get_contract_state(contract_id)?)
    }

    pub async fn list_contracts(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.ledger.read().await.list_contracts()?)
    }

    /// Node info
    pub async fn info(&self) -> NodeInfo {
        let (chain_length, difficulty, pending_transactions, paused) = {
            let ledger = self.ledger.read().await;
            (
                ledger.len(),
                ledger.difficulty(),
                ledger.pending_transactions().len(),
                ledger.is_paused(),
            )
        };
        NodeInfo {
            node_id: self.node_id.clone(),
            url: self.peers.self_url().to_string(),
            peers: self.peers.list().await,
            chain_length,
            difficulty,
            pending_transactions,
            mining: self.miner.is_running().await,
            paused,
        }
    }
}
