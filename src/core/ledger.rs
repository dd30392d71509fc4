//! Ledger implementation
//!
//! The ledger owns the chain, the mempool, the processed-transaction cache
//! and the difficulty policy, and it checkpoints all of that to disk.
//!
//! Mining is split in three steps so the proof-of-work search can run
//! without holding the ledger lock:
//! [`Ledger::prepare_block`] snapshots the mempool into an unmined block,
//! [`Block::mine_until`] does the search, and [`Ledger::commit_block`]
//! appends the result if the tip has not moved in the meantime.
//! [`Ledger::mine_pending`] runs all three in place.

use crate::core::block::{Block, BlockError};
use crate::core::contract::{ContractEngine, ContractError};
use crate::core::transaction::{
    is_system_address, unix_timestamp, Transaction, TransactionError,
};
use crate::core::validation::{audit_chain, validate_blocks, ValidationReport};
use crate::storage::{
    chain_integrity_hash, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointStore,
    LedgerSnapshot, CHECKPOINT_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Default mining difficulty (leading zero hex characters)
pub const DEFAULT_DIFFICULTY: u32 = 6;

/// Reward paid to the miner of each block
pub const MINING_REWARD: f64 = 100.0;

/// Target seconds between blocks
pub const TARGET_BLOCK_TIME: f64 = 60.0;

/// Number of blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Size above which the processed-id cache is shrunk
pub const PROCESSED_IDS_CAP: usize = 10_000;

/// Entries kept when the processed-id cache is shrunk
pub const PROCESSED_IDS_RETAIN: usize = 5_000;

const CHECKPOINT_LOG: &str = "ledger::checkpoint";

/// Ledger-related errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] TransactionError),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Stale block {index}: chain tip moved to height {height}")]
    StaleBlock { index: u64, height: u64 },
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Cannot adopt an empty chain")]
    EmptyChain,
    #[error("Ledger is already paused")]
    AlreadyPaused,
    #[error("Ledger is paused")]
    Paused,
    #[error("No checkpoint available")]
    NoCheckpoint,
    #[error("No contract engine configured")]
    NoContractEngine,
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub difficulty: u32,
    pub mining_reward: f64,
    pub target_block_time: f64,
    pub adjustment_interval: u64,
    /// `None` keeps the ledger purely in memory
    pub checkpoint: Option<CheckpointConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: MINING_REWARD,
            target_block_time: TARGET_BLOCK_TIME,
            adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            checkpoint: Some(CheckpointConfig::default()),
        }
    }
}

/// An unmined block plus the difficulty it must be mined at
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub difficulty: u32,
}

/// One page of the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPage {
    pub chain: Vec<Block>,
    pub length: usize,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub limit: usize,
}

/// A confirmed transaction together with where it was confirmed
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub block: u64,
    pub confirmed_time: f64,
}

/// Ledger statistics
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub difficulty: u32,
    pub chain_length: usize,
    pub pending_transactions: usize,
    pub target_block_time: f64,
    /// Seconds since the tip block was created
    pub last_block_time: f64,
}

/// Result of restoring a checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointRestore {
    pub metadata: CheckpointMetadata,
    /// Audit of the restored chain, when requested
    pub report: Option<ValidationReport>,
}

/// Result of resuming the ledger
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    pub restore: CheckpointRestore,
    /// Seconds since the checkpoint, if an explicit pause was active
    pub paused_for: Option<f64>,
}

/// Result of adopting a peer chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReplacement {
    pub previous_length: usize,
    pub new_length: usize,
    /// Pending transactions kept because the new chain does not confirm them
    pub requeued: usize,
}

/// The ledger: chain, mempool and mining policy
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    processed_ids: HashSet<String>,
    difficulty: u32,
    mining_reward: f64,
    target_block_time: f64,
    adjustment_interval: u64,
    last_adjustment_time: f64,
    paused: bool,
    pause_timestamp: Option<f64>,
    store: Option<CheckpointStore>,
    contracts: Option<Box<dyn ContractEngine>>,
}

impl Ledger {
    /// Create a ledger, restoring the checkpoint if one exists.
    ///
    /// Without a usable checkpoint the deterministic genesis block is
    /// created and an initial checkpoint is written.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = config.checkpoint.clone().map(CheckpointStore::new).transpose()?;
        let mut ledger = Self::empty(&config, store);

        if ledger.store.as_ref().is_some_and(CheckpointStore::exists) {
            match ledger.load_checkpoint(false) {
                Ok(restore) => {
                    log::info!(
                        "Ledger restored from checkpoint ({} blocks)",
                        restore.metadata.chain_length
                    );
                    return Ok(ledger);
                }
                Err(e) => {
                    log::warn!(target: CHECKPOINT_LOG, "Ignoring unreadable checkpoint: {}", e);
                }
            }
        }

        ledger.create_genesis_block();
        if ledger.store.is_some() {
            ledger.create_checkpoint("Initial genesis block")?;
        }

        log::info!("Ledger initialized with difficulty {}", ledger.difficulty);
        Ok(ledger)
    }

    /// Create an in-memory ledger with custom difficulty
    pub fn with_difficulty(difficulty: u32) -> Self {
        let config = LedgerConfig {
            difficulty,
            checkpoint: None,
            ..Default::default()
        };
        let mut ledger = Self::empty(&config, None);
        ledger.create_genesis_block();
        ledger
    }

    fn empty(config: &LedgerConfig, store: Option<CheckpointStore>) -> Self {
        Self {
            chain: Vec::new(),
            pending: Vec::new(),
            processed_ids: HashSet::new(),
            difficulty: config.difficulty.max(1),
            mining_reward: config.mining_reward,
            target_block_time: config.target_block_time,
            adjustment_interval: config.adjustment_interval.max(1),
            last_adjustment_time: unix_timestamp(),
            paused: false,
            pause_timestamp: None,
            store,
            contracts: None,
        }
    }

    fn create_genesis_block(&mut self) {
        let genesis = Block::genesis(self.difficulty);
        log::info!("Genesis block created: {}", genesis.hash);
        self.chain = vec![genesis];
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// All blocks, genesis first
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        // The chain is never empty: it starts at genesis and replacements
        // reject empty chains.
        &self.chain[self.chain.len() - 1]
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain holds no blocks
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Current mining difficulty
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Transactions waiting for the next block
    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    /// Size of the processed-id cache
    pub fn processed_count(&self) -> usize {
        self.processed_ids.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Set the mining difficulty manually (minimum 1)
    pub fn set_difficulty(&mut self, difficulty: u32) {
        self.difficulty = difficulty.max(1);
        log::info!("Mining difficulty set to {}", self.difficulty);
    }

    /// Get ledger statistics
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            difficulty: self.difficulty,
            chain_length: self.chain.len(),
            pending_transactions: self.pending.len(),
            target_block_time: self.target_block_time,
            last_block_time: unix_timestamp() - self.latest_block().timestamp,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Confirmed incoming minus confirmed outgoing amounts
    pub fn get_balance(&self, address: &str) -> f64 {
        self.chain
            .iter()
            .flat_map(|b| &b.transactions)
            .map(|tx| tx.balance_delta(address))
            .sum()
    }

    /// Get a block by index
    pub fn get_block_by_index(&self, index: u64) -> Option<&Block> {
        self.chain.get(index as usize)
    }

    /// Get a block by hash
    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash == hash)
    }

    /// Blocks `start..start + limit`; `None` means up to the tip
    pub fn get_chain(&self, start: usize, limit: Option<usize>) -> ChainPage {
        let length = self.chain.len();
        let limit = limit.unwrap_or(length);
        let begin = start.min(length);
        let end = start.saturating_add(limit).min(length);

        ChainPage {
            chain: self.chain[begin..end].to_vec(),
            length,
            start,
            limit,
        }
    }

    /// Every confirmed transaction sent or received by `address`
    pub fn get_transaction_history(&self, address: &str) -> Vec<HistoryEntry> {
        self.chain
            .iter()
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|tx| tx.from == address || tx.to == address)
                    .map(move |tx| HistoryEntry {
                        transaction: tx.clone(),
                        block: block.index,
                        confirmed_time: block.timestamp,
                    })
            })
            .collect()
    }

    // =========================================================================
    // Mempool
    // =========================================================================

    /// Build a transfer stamped with the current time and admit it
    pub fn submit_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        amount: f64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<String, TransactionError> {
        self.admit_transaction(Transaction::new(sender, recipient, amount, metadata))
    }

    /// Validate and queue a transaction, returning its ID.
    ///
    /// The ID is recomputed from the content; a caller-supplied one is
    /// ignored.
    pub fn admit_transaction(&mut self, mut tx: Transaction) -> Result<String, TransactionError> {
        if !tx.amount.is_finite() {
            log::warn!("Rejected non-finite amount transaction: {}", tx.amount);
            return Err(TransactionError::NonFiniteAmount(tx.amount));
        }
        if tx.amount < 0.0 {
            log::warn!("Rejected negative amount transaction: {}", tx.amount);
            return Err(TransactionError::NegativeAmount(tx.amount));
        }

        if !is_system_address(&tx.from) {
            let balance = self.get_balance(&tx.from);
            if balance < tx.amount {
                log::warn!("Rejected transaction from {}: insufficient funds", tx.from);
                return Err(TransactionError::InsufficientFunds {
                    address: tx.from.clone(),
                    balance,
                    amount: tx.amount,
                });
            }
        }

        tx.id = tx.compute_id();
        if self.processed_ids.contains(&tx.id) || self.pending.iter().any(|p| p.id == tx.id) {
            log::warn!("Rejected duplicate transaction: {}", tx.id);
            return Err(TransactionError::Duplicate(tx.id));
        }

        log::info!(
            "Added transaction: {} - {} -> {}: {}",
            tx.id,
            tx.from,
            tx.to,
            tx.amount
        );
        let id = tx.id.clone();
        self.pending.push(tx);
        Ok(id)
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// Snapshot the mempool plus a reward into an unmined block
    pub fn prepare_block(&self, miner_address: &str) -> BlockTemplate {
        let mut transactions = self.pending.clone();
        transactions.push(Transaction::reward(miner_address, self.mining_reward));

        let block = Block::new(
            self.chain.len() as u64,
            unix_timestamp(),
            transactions,
            self.latest_block().hash.clone(),
            0,
        );

        BlockTemplate {
            block,
            difficulty: self.difficulty,
        }
    }

    /// Append a mined block built by [`Ledger::prepare_block`].
    ///
    /// Confirmed transactions are recorded as processed and leave the
    /// mempool; anything submitted after the snapshot stays queued.
    /// A paused ledger refuses every block.
    pub fn commit_block(&mut self, block: Block) -> Result<(), LedgerError> {
        if self.paused {
            return Err(LedgerError::Paused);
        }
        let tip = self.latest_block();
        if block.index != self.chain.len() as u64 || block.previous_hash != tip.hash {
            return Err(LedgerError::StaleBlock {
                index: block.index,
                height: tip.index,
            });
        }
        if !block.verify_hash() || !block.is_valid_pow() {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} does not carry valid proof of work",
                block.index
            )));
        }

        let confirmed: HashSet<String> = block.transactions.iter().map(|tx| tx.id.clone()).collect();
        self.pending.retain(|tx| !confirmed.contains(&tx.id));
        self.processed_ids.extend(confirmed.iter().cloned());
        self.trim_processed_ids(&confirmed);

        self.chain.push(block);
        self.adjust_difficulty(unix_timestamp());
        Ok(())
    }

    /// Mine all pending transactions into a new block in place
    pub fn mine_pending(&mut self, miner_address: &str) -> Result<Block, LedgerError> {
        if self.paused {
            return Err(LedgerError::Paused);
        }
        let BlockTemplate {
            mut block,
            difficulty,
        } = self.prepare_block(miner_address);
        block.mine(difficulty);
        self.commit_block(block.clone())?;
        Ok(block)
    }

    /// Bound the processed-id cache, keeping `recent` plus an arbitrary subset
    fn trim_processed_ids(&mut self, recent: &HashSet<String>) {
        if self.processed_ids.len() <= PROCESSED_IDS_CAP {
            return;
        }

        let room = PROCESSED_IDS_RETAIN.saturating_sub(recent.len());
        let mut kept: HashSet<String> = self
            .processed_ids
            .drain()
            .filter(|id| !recent.contains(id))
            .take(room)
            .collect();
        kept.extend(recent.iter().cloned());
        self.processed_ids = kept;
    }

    /// Adjust mining difficulty every `adjustment_interval` blocks
    fn adjust_difficulty(&mut self, now: f64) {
        if self.chain.len() as u64 % self.adjustment_interval != 0 {
            return;
        }

        let expected = self.target_block_time * self.adjustment_interval as f64;
        let elapsed = now - self.last_adjustment_time;
        let previous = self.difficulty;

        if elapsed < expected / 2.0 {
            self.difficulty += 1;
            log::info!("Mining too fast. Increased difficulty to {}", self.difficulty);
        } else if elapsed > expected * 2.0 && self.difficulty > 1 {
            self.difficulty -= 1;
            log::info!("Mining too slow. Decreased difficulty to {}", self.difficulty);
        }

        log::debug!(
            "Difficulty check: {} -> {} (elapsed {:.1}s, expected {:.1}s)",
            previous,
            self.difficulty,
            elapsed,
            expected
        );
        self.last_adjustment_time = now;
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate hashes, links, merkle roots and proof of work
    pub fn validate_chain(&self) -> bool {
        match validate_blocks(&self.chain) {
            Ok(()) => {
                log::info!("Ledger validation complete: valid");
                true
            }
            Err(violation) => {
                log::error!("Ledger validation failed: {}", violation);
                false
            }
        }
    }

    /// Chain validation plus index, timestamp and balance checks
    pub fn comprehensive_validation(&self) -> ValidationReport {
        audit_chain(&self.chain)
    }

    // =========================================================================
    // Consensus
    // =========================================================================

    /// Replace the chain wholesale with a peer's chain.
    ///
    /// The peer's hashes, merkle roots and difficulties are taken as given.
    /// Pending transactions not confirmed by the new chain are kept.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> Result<ChainReplacement, LedgerError> {
        let Some(tail) = new_chain.last() else {
            return Err(LedgerError::EmptyChain);
        };
        let tail_difficulty = tail.difficulty;

        let confirmed: HashSet<String> = new_chain
            .iter()
            .flat_map(|b| &b.transactions)
            .map(|tx| tx.id.clone())
            .collect();

        let previous_length = self.chain.len();
        let pending = std::mem::take(&mut self.pending);
        self.chain = new_chain;
        self.difficulty = tail_difficulty.max(1);
        self.pending = pending
            .into_iter()
            .filter(|tx| !confirmed.contains(&tx.id))
            .collect();

        self.processed_ids.extend(confirmed.iter().cloned());
        self.trim_processed_ids(&HashSet::new());

        log::info!(
            "Successfully replaced chain with {} blocks (was {})",
            self.chain.len(),
            previous_length
        );

        Ok(ChainReplacement {
            previous_length,
            new_length: self.chain.len(),
            requeued: self.pending.len(),
        })
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    fn store(&self) -> Result<&CheckpointStore, LedgerError> {
        self.store
            .as_ref()
            .ok_or(LedgerError::Checkpoint(CheckpointError::Disabled))
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending.clone(),
            processed_tx_ids: self.processed_ids.clone(),
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            target_block_time: self.target_block_time,
            last_difficulty_adjustment_time: self.last_adjustment_time,
        }
    }

    /// Write a checkpoint of the full ledger state
    pub fn create_checkpoint(&self, reason: &str) -> Result<CheckpointMetadata, LedgerError> {
        log::info!(target: CHECKPOINT_LOG, "Creating checkpoint: {}", reason);
        let store = self.store()?;

        let metadata = CheckpointMetadata {
            timestamp: unix_timestamp(),
            reason: reason.to_string(),
            chain_length: self.chain.len(),
            difficulty: self.difficulty,
            pending_transactions: self.pending.len(),
            blockchain_hash: chain_integrity_hash(&self.chain),
            version: CHECKPOINT_VERSION.to_string(),
        };

        if let Err(e) = store.save(&self.snapshot(), &metadata) {
            log::error!(target: CHECKPOINT_LOG, "Failed to create checkpoint: {}", e);
            return Err(e.into());
        }

        log::info!(
            target: CHECKPOINT_LOG,
            "Checkpoint created: {} blocks",
            metadata.chain_length
        );
        Ok(metadata)
    }

    /// Restore every ledger field from the checkpoint.
    ///
    /// With `validate`, the restored chain is audited and any issues are
    /// reported; they do not undo the restore.
    pub fn load_checkpoint(&mut self, validate: bool) -> Result<CheckpointRestore, LedgerError> {
        let loaded = match self.store()?.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!(target: CHECKPOINT_LOG, "Failed to load checkpoint: {}", e);
                return Err(e.into());
            }
        };
        let Some((snapshot, metadata)) = loaded else {
            log::warn!(target: CHECKPOINT_LOG, "No checkpoint files found");
            return Err(LedgerError::NoCheckpoint);
        };
        if snapshot.chain.is_empty() {
            return Err(LedgerError::EmptyChain);
        }

        self.chain = snapshot.chain;
        self.pending = snapshot.pending_transactions;
        self.processed_ids = snapshot.processed_tx_ids;
        self.difficulty = snapshot.difficulty.max(1);
        self.mining_reward = snapshot.mining_reward;
        self.target_block_time = snapshot.target_block_time;
        self.last_adjustment_time = snapshot.last_difficulty_adjustment_time;

        log::info!(
            target: CHECKPOINT_LOG,
            "Checkpoint loaded: {} blocks, created at {}",
            self.chain.len(),
            format_unix(metadata.timestamp)
        );

        let report = validate.then(|| {
            let report = self.comprehensive_validation();
            if report.valid {
                log::info!(target: CHECKPOINT_LOG, "Checkpoint validation successful");
            } else {
                log::error!(
                    target: CHECKPOINT_LOG,
                    "Validation issues after checkpoint restore: {:?}",
                    report.issues
                );
            }
            report
        });

        Ok(CheckpointRestore { metadata, report })
    }

    /// Checkpoint the ledger and mark it paused.
    ///
    /// Stopping an active miner is the caller's job.
    pub fn pause(&mut self, reason: &str) -> Result<CheckpointMetadata, LedgerError> {
        if self.paused {
            return Err(LedgerError::AlreadyPaused);
        }

        let metadata = self.create_checkpoint(reason)?;
        self.paused = true;
        self.pause_timestamp = Some(unix_timestamp());

        log::info!(target: CHECKPOINT_LOG, "Ledger paused: {}", reason);
        Ok(metadata)
    }

    /// Restore from the checkpoint and clear the paused flag.
    ///
    /// Without an explicit pause this still tries the checkpoint as a
    /// recovery path.
    pub fn resume(&mut self, validate: bool) -> Result<ResumeOutcome, LedgerError> {
        if !self.paused && self.pause_timestamp.is_none() {
            let restore = self.load_checkpoint(validate)?;
            log::info!(target: CHECKPOINT_LOG, "Ledger restored from checkpoint");
            return Ok(ResumeOutcome {
                restore,
                paused_for: None,
            });
        }

        let restore = self.load_checkpoint(validate)?;
        self.paused = false;
        self.pause_timestamp = None;

        let paused_for = unix_timestamp() - restore.metadata.timestamp;
        log::info!(
            target: CHECKPOINT_LOG,
            "Ledger resumed after {:.1} seconds",
            paused_for
        );
        Ok(ResumeOutcome {
            restore,
            paused_for: Some(paused_for),
        })
    }

    // =========================================================================
    // Contracts
    // =========================================================================

    /// Attach the contract engine calls are forwarded to
    pub fn set_contract_engine(&mut self, engine: Box<dyn ContractEngine>) {
        self.contracts = Some(engine);
    }

    fn engine(&self) -> Result<&dyn ContractEngine, LedgerError> {
        self.contracts.as_deref().ok_or(LedgerError::NoContractEngine)
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn ContractEngine>, LedgerError> {
        self.contracts.as_mut().ok_or(LedgerError::NoContractEngine)
    }

    /// Transfer attached value to a contract, checking the balance first
    fn fund_contract(
        &mut self,
        sender: &str,
        contract_id: &str,
        value: f64,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        if value <= 0.0 {
            return Ok(());
        }
        let balance = self.get_balance(sender);
        if balance < value {
            return Err(TransactionError::InsufficientFunds {
                address: sender.to_string(),
                balance,
                amount: value,
            }
            .into());
        }
        self.submit_transaction(sender, contract_id, value, Some(metadata))?;
        Ok(())
    }

    /// Deploy a contract, funding it with `initial_balance` from `owner`
    pub fn deploy_contract(
        &mut self,
        code: &str,
        owner: &str,
        initial_balance: f64,
    ) -> Result<String, LedgerError> {
        let contract_id = self.engine()?.contract_id(code, owner);

        let metadata = BTreeMap::from([("type".to_string(), "contract_creation".to_string())]);
        self.fund_contract(owner, &contract_id, initial_balance, metadata)?;

        let deployed = self.engine_mut()?.deploy(code, owner, initial_balance)?;
        log::info!("Smart contract deployed: {}", deployed);
        Ok(deployed)
    }

    /// Call a contract method, transferring `value` from `sender` first
    pub fn call_contract(
        &mut self,
        contract_id: &str,
        method: &str,
        sender: &str,
        args: Vec<Value>,
        value: f64,
    ) -> Result<Value, LedgerError> {
        self.engine()?;

        let metadata = BTreeMap::from([
            ("type".to_string(), "contract_call".to_string()),
            ("method".to_string(), method.to_string()),
        ]);
        self.fund_contract(sender, contract_id, value, metadata)?;

        let result = self
            .engine_mut()?
            .call(contract_id, method, sender, args, value)?;
        log::info!("Smart contract called: {}.{} by {}", contract_id, method, sender);
        Ok(result)
    }

    /// Current state of a contract
    pub fn get_contract_state(&self, contract_id: &str) -> Result<Value, LedgerError> {
        Ok(self.engine()?.get_state(contract_id)?)
    }

    /// Addresses of all deployed contracts
    pub fn list_contracts(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.engine()?.list())
    }
}

/// Render fractional UNIX seconds for logs
fn format_unix(timestamp: f64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_micros((timestamp * 1_000_000.0) as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{GENESIS_ADDRESS, NETWORK_ADDRESS};
    use serde_json::json;
    use std::collections::HashMap;

    fn persistent(dir: &std::path::Path, difficulty: u32) -> Ledger {
        Ledger::new(LedgerConfig {
            difficulty,
            checkpoint: Some(CheckpointConfig::in_dir(dir)),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::with_difficulty(2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.latest_block().index, 0);
        assert_eq!(ledger.latest_block().previous_hash, "0");
        assert!(ledger.validate_chain());
    }

    #[test]
    fn test_genesis_scenario() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger
            .submit_transaction(GENESIS_ADDRESS, "A", 100.0, None)
            .unwrap();
        let block = ledger.mine_pending("miner1").unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get_balance("A"), 100.0);
        assert_eq!(ledger.get_balance("miner1"), ledger.mining_reward());
        assert!(ledger.pending_transactions().is_empty());
        assert!(ledger.validate_chain());
    }

    #[test]
    fn test_mined_block_meets_difficulty() {
        let mut ledger = Ledger::with_difficulty(2);
        let block = ledger.mine_pending("miner").unwrap();
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.difficulty, 2);
        assert_eq!(block.previous_hash, ledger.chain()[0].hash);
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut ledger = Ledger::with_difficulty(1);
        let err = ledger
            .submit_transaction(GENESIS_ADDRESS, "A", -1.0, None)
            .unwrap_err();
        assert_eq!(err, TransactionError::NegativeAmount(-1.0));
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_non_finite_amount_rejected() {
        let mut ledger = Ledger::with_difficulty(1);
        for amount in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = ledger
                .submit_transaction(GENESIS_ADDRESS, "A", amount, None)
                .unwrap_err();
            assert!(matches!(err, TransactionError::NonFiniteAmount(_)));
        }
        assert!(ledger.pending_transactions().is_empty());
        assert_eq!(ledger.get_balance("A"), 0.0);
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let mut ledger = Ledger::with_difficulty(1);
        let err = ledger.submit_transaction("alice", "bob", 1.0, None).unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientFunds { .. }));

        ledger.submit_transaction(GENESIS_ADDRESS, "alice", 10.0, None).unwrap();
        ledger.mine_pending("m").unwrap();
        assert!(ledger.submit_transaction("alice", "bob", 10.0, None).is_ok());
    }

    #[test]
    fn test_double_spend_rejected_after_mining() {
        let mut ledger = Ledger::with_difficulty(1);
        let tx = Transaction::with_timestamp(GENESIS_ADDRESS, "A", 5.0, 1234.5, None);

        let id = ledger.admit_transaction(tx.clone()).unwrap();
        ledger.mine_pending("miner").unwrap();

        let err = ledger.admit_transaction(tx).unwrap_err();
        assert_eq!(err, TransactionError::Duplicate(id));
        assert_eq!(ledger.get_balance("A"), 5.0);
    }

    #[test]
    fn test_duplicate_in_mempool_rejected() {
        let mut ledger = Ledger::with_difficulty(1);
        let tx = Transaction::with_timestamp(GENESIS_ADDRESS, "A", 5.0, 1.0, None);
        ledger.admit_transaction(tx.clone()).unwrap();
        assert!(matches!(
            ledger.admit_transaction(tx),
            Err(TransactionError::Duplicate(_))
        ));
    }

    #[test]
    fn test_system_addresses_go_negative() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.submit_transaction(GENESIS_ADDRESS, "A", 30.0, None).unwrap();
        ledger.mine_pending("miner").unwrap();

        assert_eq!(ledger.get_balance(GENESIS_ADDRESS), -30.0);
        assert_eq!(ledger.get_balance(NETWORK_ADDRESS), -ledger.mining_reward());
    }

    #[test]
    fn test_balance_is_confirmed_in_minus_out() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.submit_transaction(GENESIS_ADDRESS, "A", 50.0, None).unwrap();
        ledger.mine_pending("m").unwrap();
        ledger.submit_transaction("A", "B", 20.0, None).unwrap();
        ledger.mine_pending("m").unwrap();

        let mut expected: HashMap<&str, f64> = HashMap::new();
        for tx in ledger.chain().iter().flat_map(|b| &b.transactions) {
            *expected.entry(tx.to.as_str()).or_default() += tx.amount;
            *expected.entry(tx.from.as_str()).or_default() -= tx.amount;
        }
        for (address, balance) in expected {
            assert_eq!(ledger.get_balance(address), balance, "{}", address);
        }
        assert_eq!(ledger.get_balance("A"), 30.0);
        assert_eq!(ledger.get_balance("B"), 20.0);
    }

    #[test]
    fn test_tampered_amount_invalidates_chain() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.submit_transaction(GENESIS_ADDRESS, "A", 50.0, None).unwrap();
        ledger.mine_pending("m").unwrap();
        assert!(ledger.validate_chain());

        ledger.chain[1].transactions[0].amount = 5_000.0;
        assert!(!ledger.validate_chain());
        assert!(!ledger.comprehensive_validation().valid);
    }

    #[test]
    fn test_commit_rejects_stale_block() {
        let mut ledger = Ledger::with_difficulty(1);
        let BlockTemplate {
            mut block,
            difficulty,
        } = ledger.prepare_block("slow");
        ledger.mine_pending("fast").unwrap();

        block.mine(difficulty);
        assert!(matches!(
            ledger.commit_block(block),
            Err(LedgerError::StaleBlock { index: 1, .. })
        ));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_submission_during_mining_waits_for_next_block() {
        let mut ledger = Ledger::with_difficulty(1);
        let BlockTemplate {
            mut block,
            difficulty,
        } = ledger.prepare_block("miner");

        let late = ledger.submit_transaction(GENESIS_ADDRESS, "late", 1.0, None).unwrap();
        block.mine(difficulty);
        ledger.commit_block(block).unwrap();

        assert_eq!(ledger.pending_transactions().len(), 1);
        assert_eq!(ledger.pending_transactions()[0].id, late);
    }

    #[test]
    fn test_processed_ids_are_bounded() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.processed_ids = (0..PROCESSED_IDS_CAP).map(|i| i.to_string()).collect();

        ledger.submit_transaction(GENESIS_ADDRESS, "A", 1.0, None).unwrap();
        let block = ledger.mine_pending("m").unwrap();

        assert_eq!(ledger.processed_count(), PROCESSED_IDS_RETAIN);
        for tx in &block.transactions {
            assert!(ledger.processed_ids.contains(&tx.id));
        }
    }

    #[test]
    fn test_difficulty_increases_when_fast() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.adjustment_interval = 2;
        ledger.target_block_time = 60.0;

        ledger.mine_pending("m").unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.difficulty(), 2);
    }

    #[test]
    fn test_difficulty_decreases_when_slow() {
        let mut ledger = Ledger::with_difficulty(2);
        ledger.adjustment_interval = 2;
        ledger.target_block_time = 1.0;
        ledger.last_adjustment_time = unix_timestamp() - 100.0;

        ledger.mine_pending("m").unwrap();
        assert_eq!(ledger.difficulty(), 1);
    }

    #[test]
    fn test_difficulty_never_below_one() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.adjustment_interval = 2;
        ledger.target_block_time = 1.0;
        ledger.last_adjustment_time = unix_timestamp() - 100.0;

        ledger.mine_pending("m").unwrap();
        assert_eq!(ledger.difficulty(), 1);
    }

    #[test]
    fn test_adjustment_resets_clock_without_change() {
        let mut ledger = Ledger::with_difficulty(3);
        ledger.chain.push(ledger.chain[0].clone());
        ledger.adjustment_interval = 2;
        ledger.target_block_time = 10.0;
        ledger.last_adjustment_time = 0.0;

        // 20s expected, 15s elapsed: inside the band.
        ledger.adjust_difficulty(15.0);
        assert_eq!(ledger.difficulty(), 3);
        assert_eq!(ledger.last_adjustment_time, 15.0);
    }

    #[test]
    fn test_set_difficulty_clamps() {
        let mut ledger = Ledger::with_difficulty(3);
        ledger.set_difficulty(0);
        assert_eq!(ledger.difficulty(), 1);
    }

    #[test]
    fn test_replace_chain_reconciles_mempool() {
        let mut peer = Ledger::with_difficulty(1);
        let shared = Transaction::with_timestamp(GENESIS_ADDRESS, "A", 1.0, 10.0, None);
        peer.admit_transaction(shared.clone()).unwrap();
        peer.mine_pending("peer").unwrap();
        peer.set_difficulty(3);
        peer.chain.last_mut().unwrap().difficulty = 3;

        let mut local = Ledger::with_difficulty(1);
        local.admit_transaction(shared).unwrap();
        let own = local.submit_transaction(GENESIS_ADDRESS, "B", 2.0, None).unwrap();

        let outcome = local.replace_chain(peer.chain().to_vec()).unwrap();
        assert_eq!(outcome.previous_length, 1);
        assert_eq!(outcome.new_length, 2);
        assert_eq!(outcome.requeued, 1);
        assert_eq!(local.pending_transactions()[0].id, own);
        assert_eq!(local.difficulty(), 3);
        assert_eq!(local.chain(), peer.chain());
    }

    #[test]
    fn test_replace_with_empty_chain_fails() {
        let mut ledger = Ledger::with_difficulty(1);
        assert!(matches!(
            ledger.replace_chain(vec![]),
            Err(LedgerError::EmptyChain)
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_get_chain_pagination() {
        let mut ledger = Ledger::with_difficulty(1);
        for _ in 0..3 {
            ledger.mine_pending("m").unwrap();
        }
        let page = ledger.get_chain(1, Some(2));
        assert_eq!(page.length, 4);
        assert_eq!(page.chain.len(), 2);
        assert_eq!(page.chain[0].index, 1);

        assert!(ledger.get_chain(10, None).chain.is_empty());
        assert_eq!(ledger.get_chain(0, None).chain.len(), 4);
    }

    #[test]
    fn test_block_lookup_and_history() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.submit_transaction(GENESIS_ADDRESS, "A", 7.0, None).unwrap();
        let block = ledger.mine_pending("m").unwrap();

        assert_eq!(ledger.get_block_by_hash(&block.hash), Some(&block));
        assert_eq!(ledger.get_block_by_index(1), Some(&block));
        assert!(ledger.get_block_by_index(9).is_none());

        let history = ledger.get_transaction_history("A");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block, 1);
        assert_eq!(history[0].confirmed_time, block.timestamp);
    }

    #[test]
    fn test_checkpoint_roundtrip_on_fresh_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = persistent(dir.path(), 1);
        ledger.submit_transaction(GENESIS_ADDRESS, "A", 10.0, None).unwrap();
        ledger.mine_pending("m").unwrap();
        ledger.submit_transaction(GENESIS_ADDRESS, "B", 3.0, None).unwrap();
        let metadata = ledger.create_checkpoint("test").unwrap();
        assert_eq!(metadata.chain_length, 2);
        assert_eq!(metadata.pending_transactions, 1);
        assert_eq!(metadata.blockchain_hash, chain_integrity_hash(ledger.chain()));

        let restored = persistent(dir.path(), 1);
        assert_eq!(restored.chain(), ledger.chain());
        assert_eq!(restored.pending_transactions(), ledger.pending_transactions());
        assert_eq!(restored.processed_count(), ledger.processed_count());
    }

    #[test]
    fn test_fresh_ledger_writes_initial_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = persistent(dir.path(), 2);
        let metadata = ledger.store().unwrap().load_metadata().unwrap().unwrap();
        assert_eq!(metadata.reason, "Initial genesis block");
        assert_eq!(metadata.chain_length, 1);
        assert_eq!(metadata.version, CHECKPOINT_VERSION);
    }

    #[test]
    fn test_load_checkpoint_reports_issues_without_refusing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = persistent(dir.path(), 1);
        ledger.mine_pending("m").unwrap();
        ledger.chain[1].transactions[0].amount = 1.0e9;
        ledger.create_checkpoint("tampered").unwrap();

        let mut other = persistent(dir.path(), 1);
        let restore = other.load_checkpoint(true).unwrap();
        let report = restore.report.unwrap();
        assert!(!report.valid);
        assert_eq!(other.chain(), ledger.chain());
    }

    #[test]
    fn test_checkpoint_disabled_in_memory() {
        let mut ledger = Ledger::with_difficulty(1);
        assert!(matches!(
            ledger.create_checkpoint("x"),
            Err(LedgerError::Checkpoint(CheckpointError::Disabled))
        ));
        assert!(ledger.pause("x").is_err());
        assert!(!ledger.is_paused());
    }

    #[test]
    fn test_pause_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = persistent(dir.path(), 1);
        ledger.mine_pending("m").unwrap();

        ledger.pause("maintenance").unwrap();
        assert!(ledger.is_paused());
        assert!(matches!(ledger.pause("again"), Err(LedgerError::AlreadyPaused)));

        // Mempool changes after the pause are rolled back by resume.
        assert!(matches!(ledger.mine_pending("m"), Err(LedgerError::Paused)));
        ledger
            .submit_transaction(GENESIS_ADDRESS, "A", 5.0, None)
            .unwrap();
        let outcome = ledger.resume(true).unwrap();
        assert!(!ledger.is_paused());
        assert!(outcome.paused_for.is_some());
        assert_eq!(ledger.len(), 2);
        assert!(ledger.pending_transactions().is_empty());
        assert!(outcome.restore.report.unwrap().valid);
    }

    #[test]
    fn test_paused_ledger_refuses_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = persistent(dir.path(), 1);
        let template = ledger.prepare_block("m");
        ledger.pause("maintenance").unwrap();

        let mut block = template.block;
        block.mine(template.difficulty);
        assert!(matches!(ledger.commit_block(block), Err(LedgerError::Paused)));
        assert!(matches!(ledger.mine_pending("m"), Err(LedgerError::Paused)));
        assert_eq!(ledger.len(), 1);

        ledger.resume(false).unwrap();
        ledger.mine_pending("m").unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_resume_without_pause_is_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = persistent(dir.path(), 1);
        let outcome = ledger.resume(false).unwrap();
        assert!(outcome.paused_for.is_none());
        assert!(outcome.restore.report.is_none());
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        let mut ledger = Ledger::with_difficulty(1);
        assert!(ledger.resume(false).is_err());
    }

    struct EchoEngine {
        deployed: Vec<String>,
    }

    impl ContractEngine for EchoEngine {
        fn contract_id(&self, code: &str, owner: &str) -> String {
            crate::crypto::sha256_hex(format!("{}{}", code, owner).as_bytes())
        }

        fn deploy(
            &mut self,
            code: &str,
            owner: &str,
            _initial_balance: f64,
        ) -> Result<String, ContractError> {
            let id = self.contract_id(code, owner);
            self.deployed.push(id.clone());
            Ok(id)
        }

        fn call(
            &mut self,
            contract_id: &str,
            method: &str,
            _sender: &str,
            args: Vec<Value>,
            _value: f64,
        ) -> Result<Value, ContractError> {
            if !self.deployed.iter().any(|d| d == contract_id) {
                return Err(ContractError::NotFound(contract_id.into()));
            }
            Ok(json!({ "method": method, "args": args }))
        }

        fn get_state(&self, contract_id: &str) -> Result<Value, ContractError> {
            Ok(json!({ "id": contract_id }))
        }

        fn list(&self) -> Vec<String> {
            self.deployed.clone()
        }
    }

    #[test]
    fn test_contract_pass_through() {
        let mut ledger = Ledger::with_difficulty(1);
        assert!(matches!(
            ledger.list_contracts(),
            Err(LedgerError::NoContractEngine)
        ));

        ledger.set_contract_engine(Box::new(EchoEngine { deployed: vec![] }));
        ledger.submit_transaction(GENESIS_ADDRESS, "owner", 20.0, None).unwrap();
        ledger.mine_pending("m").unwrap();

        let id = ledger.deploy_contract("code", "owner", 5.0).unwrap();
        assert_eq!(ledger.list_contracts().unwrap(), vec![id.clone()]);

        let funding = &ledger.pending_transactions()[0];
        assert_eq!(funding.to, id);
        assert_eq!(funding.kind.as_deref(), Some("contract_creation"));

        let result = ledger
            .call_contract(&id, "ping", "owner", vec![json!(1)], 0.0)
            .unwrap();
        assert_eq!(result["method"], "ping");
        assert_eq!(ledger.get_contract_state(&id).unwrap()["id"], json!(id));
    }

    #[test]
    fn test_contract_value_requires_balance() {
        let mut ledger = Ledger::with_difficulty(1);
        ledger.set_contract_engine(Box::new(EchoEngine { deployed: vec![] }));
        let err = ledger.deploy_contract("code", "poor", 5.0).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(TransactionError::InsufficientFunds { .. })
        ));
        assert!(ledger.list_contracts().unwrap().is_empty());
    }
}
