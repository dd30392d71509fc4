//! Core ledger components
//!
//! - Transactions (account transfers with content-derived IDs)
//! - Blocks (merkle root, proof of work)
//! - Chain validation at three levels of strictness
//! - The ledger itself: mempool, mining steps, difficulty, checkpoints
//! - The contract engine seam

pub mod block;
pub mod contract;
pub mod ledger;
pub mod transaction;
pub mod validation;

pub use block::{Block, BlockError, DEFAULT_WIRE_DIFFICULTY, GENESIS_MESSAGE, GENESIS_TIMESTAMP};
pub use contract::{ContractEngine, ContractError};
pub use ledger::{
    BlockTemplate, ChainPage, ChainReplacement, CheckpointRestore, HistoryEntry, Ledger,
    LedgerConfig, LedgerError, LedgerStats, ResumeOutcome, DEFAULT_DIFFICULTY,
    DIFFICULTY_ADJUSTMENT_INTERVAL, MINING_REWARD, PROCESSED_IDS_CAP, PROCESSED_IDS_RETAIN,
    TARGET_BLOCK_TIME,
};
pub use transaction::{
    is_system_address, unix_timestamp, Transaction, TransactionError, GENESIS_ADDRESS,
    KEEP_ALIVE_TYPE, NETWORK_ADDRESS, REWARD_TYPE,
};
pub use validation::{
    audit_chain, validate_blocks, validate_external_chain, ChainViolation, ValidationReport,
};
