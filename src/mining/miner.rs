//! Mining engine for the ledger
//!
//! [`mine_detached`] mines one block without holding the ledger lock during
//! the proof-of-work search. [`Miner`] runs it in a background task until
//! stopped, optionally syncing with the network before each attempt.

use crate::core::{
    Block, BlockError, BlockTemplate, Ledger, LedgerError, KEEP_ALIVE_TYPE, NETWORK_ADDRESS,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// The ledger as shared between the miner, consensus and API handlers
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Pause between two mining attempts
pub const BLOCK_INTERVAL: Duration = Duration::from_millis(500);

/// Settle time after a pre-mining sync changed the chain
pub const SYNC_SETTLE: Duration = Duration::from_millis(500);

/// Back-off after a failed mining attempt
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// How long `stop` waits for the mining task to finish
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Mining task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Mining statistics
#[derive(Debug, Clone, Serialize)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn measure(hash_attempts: u64, start: Instant) -> Self {
        let time_ms = start.elapsed().as_millis();
        let hash_rate = if time_ms > 0 {
            hash_attempts as f64 / (time_ms as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms,
            hash_rate,
        }
    }
}

/// A block the miner appended to the chain
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub stats: MiningStats,
}

/// Request to sync with the network before the next attempt.
///
/// The receiver answers `true` if the local chain was replaced.
#[derive(Debug)]
pub struct SyncRequest {
    pub reply: oneshot::Sender<bool>,
}

/// Everything a mining run needs; kept so the run can be restarted
#[derive(Debug, Clone)]
pub struct MiningJob {
    /// Recipient of the mining rewards
    pub address: String,
    /// Receives every block this run appends
    pub events: Option<mpsc::Sender<MinedBlock>>,
    /// Consulted before every attempt
    pub presync: Option<mpsc::Sender<SyncRequest>>,
}

impl MiningJob {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            events: None,
            presync: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<MinedBlock>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_presync(mut self, presync: mpsc::Sender<SyncRequest>) -> Self {
        self.presync = Some(presync);
        self
    }
}

/// Miner lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerState {
    Idle,
    Running,
    Stopping,
}

/// Snapshot the mempool, mine without the lock held, then commit.
///
/// Returns `Ok(None)` if `cancel` was raised during the search.
pub async fn mine_detached(
    ledger: &SharedLedger,
    miner_address: &str,
    cancel: Arc<AtomicBool>,
) -> Result<Option<MinedBlock>, MiningError> {
    let BlockTemplate { block, difficulty } = ledger.read().await.prepare_block(miner_address);

    info!(
        "Mining block {} with difficulty {}...",
        block.index, difficulty
    );

    let start = Instant::now();
    let (block, outcome) = tokio::task::spawn_blocking(move || {
        let mut block = block;
        let outcome = block.mine_until(difficulty, &cancel);
        (block, outcome)
    })
    .await?;

    let attempts = match outcome {
        Ok(attempts) => attempts,
        Err(BlockError::MiningCancelled { index, attempts }) => {
            debug!("Mining of block {} abandoned after {} attempts", index, attempts);
            return Ok(None);
        }
    };
    let stats = MiningStats::measure(attempts, start);

    ledger.write().await.commit_block(block.clone())?;

    info!(
        "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
        block.index, stats.time_ms, stats.hash_attempts, stats.hash_rate
    );
    Ok(Some(MinedBlock { block, stats }))
}

struct MinerInner {
    state: MinerState,
    job: Option<MiningJob>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
}

/// Background miner for one ledger
pub struct Miner {
    ledger: SharedLedger,
    inner: Mutex<MinerInner>,
}

impl Miner {
    /// Create an idle miner
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            inner: Mutex::new(MinerInner {
                state: MinerState::Idle,
                job: None,
                handle: None,
                cancel: Arc::new(AtomicBool::new(false)),
                stop_tx: None,
            }),
        }
    }

    /// Start continuous mining; returns false if already running or if the
    /// ledger is paused
    pub async fn start(&self, job: MiningJob) -> bool {
        let (difficulty, paused) = {
            let ledger = self.ledger.read().await;
            (ledger.difficulty(), ledger.is_paused())
        };
        if paused {
            warn!("Refusing to start mining while the ledger is paused");
            return false;
        }
        let mut inner = self.inner.lock().await;
        if inner.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Mining already in progress");
            return false;
        }

        info!("Starting continuous mining with difficulty {}", difficulty);
        info!("Mining rewards will be sent to {}", job.address);

        let cancel = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = MiningWorker {
            ledger: self.ledger.clone(),
            job: job.clone(),
            cancel: cancel.clone(),
            stop_rx,
        };

        inner.handle = Some(tokio::spawn(worker.run()));
        inner.state = MinerState::Running;
        inner.job = Some(job);
        inner.cancel = cancel;
        inner.stop_tx = Some(stop_tx);
        true
    }

    /// Cancel the mining task and wait (bounded) for it to finish.
    ///
    /// Returns false if no mining was in progress.
    pub async fn stop(&self) -> bool {
        let handle = {
            let mut inner = self.inner.lock().await;
            let Some(handle) = inner.handle.take() else {
                warn!("No mining in progress");
                return false;
            };
            inner.state = MinerState::Stopping;
            inner.cancel.store(true, Ordering::Relaxed);
            if let Some(stop_tx) = inner.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            handle
        };

        info!("Stopping mining...");
        if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
            warn!("Mining task did not finish within {:?}", STOP_TIMEOUT);
        }

        let mut inner = self.inner.lock().await;
        if inner.handle.is_none() {
            inner.state = MinerState::Idle;
        }
        info!("Mining stopped");
        true
    }

    /// Start again with the last job, if there was one
    pub async fn restart(&self) -> bool {
        let job = self.inner.lock().await.job.clone();
        match job {
            Some(job) => self.start(job).await,
            None => false,
        }
    }

    pub async fn state(&self) -> MinerState {
        self.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .lock()
            .await
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Reward address of the current or last run
    pub async fn current_address(&self) -> Option<String> {
        self.inner.lock().await.job.as_ref().map(|j| j.address.clone())
    }
}

struct MiningWorker {
    ledger: SharedLedger,
    job: MiningJob,
    cancel: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
}

impl MiningWorker {
    async fn run(mut self) {
        while !self.stopped() {
            match self.attempt().await {
                Ok(()) => self.sleep(BLOCK_INTERVAL).await,
                Err(MiningError::Ledger(LedgerError::Paused)) => {
                    info!("Ledger paused, mining loop exiting");
                    break;
                }
                Err(e) => {
                    error!("Error in mining loop: {}", e);
                    self.sleep(ERROR_BACKOFF).await;
                }
            }
        }
        debug!("Mining loop for {} exited", self.job.address);
    }

    fn stopped(&self) -> bool {
        // A dropped sender means the owning miner is gone.
        self.cancel.load(Ordering::Relaxed) || self.stop_rx.has_changed().is_err()
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_rx.changed() => {}
        }
    }

    /// Ask the consensus side to sync; false if nobody answers
    async fn presync(&mut self) -> bool {
        let Some(presync) = &self.job.presync else {
            return false;
        };

        debug!("Syncing with network before mining...");
        let (reply, answer) = oneshot::channel();
        if presync.send(SyncRequest { reply }).await.is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    async fn attempt(&mut self) -> Result<(), MiningError> {
        if self.ledger.read().await.is_paused() {
            return Err(LedgerError::Paused.into());
        }
        if self.presync().await {
            debug!("Ledger synced with network");
            self.sleep(SYNC_SETTLE).await;
        }
        if self.stopped() {
            return Ok(());
        }

        {
            let mut ledger = self.ledger.write().await;
            if ledger.is_paused() {
                return Err(LedgerError::Paused.into());
            }
            if ledger.pending_transactions().is_empty() {
                let metadata =
                    BTreeMap::from([("type".to_string(), KEEP_ALIVE_TYPE.to_string())]);
                if let Err(e) =
                    ledger.submit_transaction(NETWORK_ADDRESS, &self.job.address, 0.0, Some(metadata))
                {
                    debug!("Keep-alive transaction not queued: {}", e);
                }
            }
        }

        let mined = match mine_detached(&self.ledger, &self.job.address, self.cancel.clone()).await {
            Ok(mined) => mined,
            Err(MiningError::Ledger(LedgerError::StaleBlock { index, height })) => {
                info!(
                    "Discarding block {}: chain advanced to height {} while mining",
                    index, height
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let (Some(mined), Some(events)) = (mined, &self.job.events) {
            if events.send(mined).await.is_err() {
                debug!("No listener for mined blocks");
            }
        }
        Ok(())
    }
}
