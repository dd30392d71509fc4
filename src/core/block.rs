//! Block implementation for the ledger
//!
//! A block holds an ordered transaction list, the merkle root over that
//! list, a link to its predecessor and the proof-of-work nonce.

use crate::core::transaction::{Transaction, GENESIS_ADDRESS, NETWORK_ADDRESS};
use crate::crypto::{calculate_merkle_root, hash_canonical, meets_difficulty};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// Genesis Constants
// =============================================================================

/// Fixed genesis timestamp (2023-05-22T22:00:00Z), shared by every node
pub const GENESIS_TIMESTAMP: f64 = 1_684_792_800.0;

/// Message carried by the genesis transaction
pub const GENESIS_MESSAGE: &str = "Genesis Block - First block in the chain";

/// Previous-hash placeholder of the genesis block
pub const GENESIS_PREV_HASH: &str = "0";

/// Difficulty assumed for wire records that omit it
pub const DEFAULT_WIRE_DIFFICULTY: u32 = 4;

/// Progress is logged every this many nonces
const MINING_LOG_INTERVAL: u64 = 100_000;

fn default_wire_difficulty() -> u32 {
    DEFAULT_WIRE_DIFFICULTY
}

// =============================================================================
// Block Errors
// =============================================================================

/// Block-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Mining of block {index} cancelled after {attempts} attempts")]
    MiningCancelled { index: u64, attempts: u64 },
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain
    pub index: u64,
    /// Creation time, fractional UNIX seconds
    pub timestamp: f64,
    /// Transactions confirmed by this block
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block
    pub previous_hash: String,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Merkle root of all transactions
    #[serde(default)]
    pub merkle_root: String,
    /// Block hash (cached)
    pub hash: String,
    /// Leading zero hex characters this block was mined for
    #[serde(default = "default_wire_difficulty")]
    pub difficulty: u32,
}

impl Block {
    /// Create a new, unmined block
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        nonce: u64,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce,
            merkle_root,
            hash: String::new(),
            difficulty: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Create the deterministic genesis block.
    ///
    /// The genesis block is never mined; `difficulty` is recorded only.
    pub fn genesis(difficulty: u32) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("message".to_string(), GENESIS_MESSAGE.to_string());
        let tx = Transaction::with_timestamp(
            GENESIS_ADDRESS,
            NETWORK_ADDRESS,
            0.0,
            GENESIS_TIMESTAMP,
            Some(metadata),
        );

        let mut block = Self::new(
            0,
            GENESIS_TIMESTAMP,
            vec![tx],
            GENESIS_PREV_HASH.to_string(),
            0,
        );
        block.difficulty = difficulty;
        block
    }

    /// Calculate the merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let leaves: Vec<String> = transactions.iter().map(Transaction::leaf_hash).collect();
        calculate_merkle_root(&leaves)
    }

    /// Hash over index, timestamp, merkle root, previous hash and nonce
    pub fn calculate_hash(&self) -> String {
        hash_canonical(&json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "merkle_root": self.merkle_root,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        }))
    }

    /// Mine the block without a way to stop it
    pub fn mine(&mut self, difficulty: u32) -> u64 {
        let never = AtomicBool::new(false);
        // Only cancellation can fail the search.
        self.mine_until(difficulty, &never).unwrap_or(0)
    }

    /// Mine the block, polling `cancel` on every iteration.
    ///
    /// Returns the number of hashes tried.
    pub fn mine_until(&mut self, difficulty: u32, cancel: &AtomicBool) -> Result<u64, BlockError> {
        self.difficulty = difficulty;
        let mut attempts = 0u64;

        while !meets_difficulty(&self.hash, difficulty) {
            if cancel.load(Ordering::Relaxed) {
                return Err(BlockError::MiningCancelled {
                    index: self.index,
                    attempts,
                });
            }

            self.nonce = self.nonce.wrapping_add(1);
            self.hash = self.calculate_hash();
            attempts += 1;

            if attempts % MINING_LOG_INTERVAL == 0 {
                log::debug!(
                    "Mining block #{}: nonce at {}, target difficulty {}",
                    self.index,
                    self.nonce,
                    difficulty
                );
            }
        }

        log::info!(
            "Block #{} mined with nonce {}: {}",
            self.index,
            self.nonce,
            self.hash
        );
        Ok(attempts)
    }

    /// Check the stored hash against the stored difficulty
    pub fn is_valid_pow(&self) -> bool {
        meets_difficulty(&self.hash, self.difficulty)
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.merkle_root
    }

    /// Verify the block hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Recipient of this block's mining reward, if any
    pub fn miner(&self) -> Option<&str> {
        self.transactions
            .iter()
            .find(|tx| tx.is_reward())
            .map(|tx| tx.to.as_str())
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
