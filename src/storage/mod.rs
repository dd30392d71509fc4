//! Storage module for ledger checkpoints

pub mod checkpoint;

pub use checkpoint::{
    chain_integrity_hash, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointStore,
    LedgerSnapshot, CHECKPOINT_VERSION,
};
