//! powchain: a proof-of-work ledger node
//!
//! This crate provides:
//! - Account-style transactions with content-derived IDs
//! - Blocks with merkle roots and leading-zero proof of work
//! - A ledger with mempool, balance checks, difficulty retargeting and checkpoints
//! - A cancellable background miner
//! - Longest-valid-chain consensus between HTTP peers
//!
//! # Example
//!
//! ```rust
//! use powchain::core::Ledger;
//!
//! let mut ledger = Ledger::with_difficulty(1);
//! let block = ledger.mine_pending("alice").unwrap();
//! println!("Mined block {} with nonce {}", block.index, block.nonce);
//! assert_eq!(ledger.get_balance("alice"), 100.0);
//! ```

pub mod api;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{
    Block, Ledger, LedgerConfig, LedgerError, Transaction, DEFAULT_DIFFICULTY, MINING_REWARD,
};
pub use mining::{Miner, MiningJob, SharedLedger};
pub use network::{ConsensusAgent, HttpPeerClient, Node, NodeConfig, PeerClient, PeerRegistry};
pub use storage::{CheckpointConfig, CheckpointStore};
