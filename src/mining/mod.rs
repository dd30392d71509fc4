//! Mining module: detached proof-of-work and the background miner

pub mod miner;

pub use miner::{
    mine_detached, MinedBlock, Miner, MinerState, MiningError, MiningJob, MiningStats,
    SharedLedger, SyncRequest, BLOCK_INTERVAL, ERROR_BACKOFF, STOP_TIMEOUT,
};
