//! Ledger checkpoints
//!
//! A checkpoint is a pair of files written together:
//! - a JSON metadata record (reason, chain length, integrity hash, ...)
//! - a bincode blob with the full ledger state
//!
//! Each checkpoint overwrites the previous one. A missing pair means no
//! checkpoint is available.

use crate::core::{Block, Transaction};
use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format version written into every metadata record
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Checkpoint errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Metadata error: {0}")]
    MetadataError(#[from] serde_json::Error),
    #[error("State encoding error: {0}")]
    StateError(#[from] bincode::Error),
    #[error("Checkpointing is disabled for this ledger")]
    Disabled,
}

/// Where checkpoint files live
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub data_dir: PathBuf,
    pub state_file: String,
    pub metadata_file: String,
}

impl CheckpointConfig {
    /// Default file names under `data_dir`
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".powchain_data"),
            state_file: "ledger_checkpoint.bin".to_string(),
            metadata_file: "ledger_checkpoint_meta.json".to_string(),
        }
    }
}

/// Human-readable description of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Creation time, fractional UNIX seconds
    pub timestamp: f64,
    pub reason: String,
    pub chain_length: usize,
    pub difficulty: u32,
    pub pending_transactions: usize,
    /// SHA-256 over the concatenated block hashes
    pub blockchain_hash: String,
    pub version: String,
}

/// Everything needed to restore a ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
    pub processed_tx_ids: HashSet<String>,
    pub difficulty: u32,
    pub mining_reward: f64,
    pub target_block_time: f64,
    pub last_difficulty_adjustment_time: f64,
}

/// Whole-chain integrity digest
pub fn chain_integrity_hash(chain: &[Block]) -> String {
    let combined: String = chain.iter().map(|b| b.hash.as_str()).collect();
    sha256_hex(combined.as_bytes())
}

/// Reads and writes the checkpoint file pair
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    config: CheckpointConfig,
}

impl CheckpointStore {
    /// Create a store, making sure the data directory exists
    pub fn new(config: CheckpointConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.state_file)
    }

    fn metadata_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.metadata_file)
    }

    /// Data directory backing this store
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// True if both files are present
    pub fn exists(&self) -> bool {
        self.state_path().exists() && self.metadata_path().exists()
    }

    /// Write both files, replacing any previous checkpoint.
    ///
    /// Both files are staged under temporary names first so a failed write
    /// leaves the previous pair untouched.
    pub fn save(
        &self,
        snapshot: &LedgerSnapshot,
        metadata: &CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let state_tmp = self
            .config
            .data_dir
            .join(format!("{}.tmp", self.config.state_file));
        let meta_tmp = self
            .config
            .data_dir
            .join(format!("{}.tmp", self.config.metadata_file));

        {
            let mut writer = BufWriter::new(fs::File::create(&state_tmp)?);
            bincode::serialize_into(&mut writer, snapshot)?;
            writer.flush()?;
        }
        {
            let mut writer = BufWriter::new(fs::File::create(&meta_tmp)?);
            serde_json::to_writer_pretty(&mut writer, metadata)?;
            writer.flush()?;
        }

        fs::rename(&state_tmp, self.state_path())?;
        fs::rename(&meta_tmp, self.metadata_path())?;
        Ok(())
    }

    /// Read only the metadata record
    pub fn load_metadata(&self) -> Result<Option<CheckpointMetadata>, CheckpointError> {
        if !self.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(fs::File::open(self.metadata_path())?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Read the checkpoint pair; `Ok(None)` when it does not exist
    pub fn load(&self) -> Result<Option<(LedgerSnapshot, CheckpointMetadata)>, CheckpointError> {
        let Some(metadata) = self.load_metadata()? else {
            return Ok(None);
        };
        let reader = BufReader::new(fs::File::open(self.state_path())?);
        let snapshot: LedgerSnapshot = bincode::deserialize_from(reader)?;
        Ok(Some((snapshot, metadata)))
    }
}
