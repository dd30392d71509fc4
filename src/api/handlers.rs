//! REST API handlers for node operations

use crate::core::{
    unix_timestamp, Block, ChainPage, ContractError, HistoryEntry, LedgerError, Transaction,
    ValidationReport,
};
use crate::network::{
    BlockNotification, MiningOverview, Node, NodeError, NodeInfo, NotificationOutcome, PeerList,
    RegisterNodes,
};
use crate::storage::CheckpointError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.into(),
        }),
    )
}

impl From<NodeError> for (StatusCode, Json<ApiError>) {
    fn from(err: NodeError) -> Self {
        let status = match &err {
            NodeError::Transaction(_) | NodeError::Ledger(LedgerError::Rejected(_)) => {
                StatusCode::BAD_REQUEST
            }
            NodeError::Paused
            | NodeError::Ledger(LedgerError::AlreadyPaused)
            | NodeError::Ledger(LedgerError::Paused) => {
                StatusCode::CONFLICT
            }
            NodeError::Ledger(LedgerError::NoCheckpoint)
            | NodeError::Ledger(LedgerError::Contract(ContractError::NotFound(_)))
            | NodeError::Ledger(LedgerError::Contract(ContractError::MethodNotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            NodeError::Ledger(LedgerError::Contract(ContractError::Rejected(_))) => {
                StatusCode::FORBIDDEN
            }
            NodeError::Ledger(LedgerError::NoContractEngine)
            | NodeError::Ledger(LedgerError::Checkpoint(CheckpointError::Disabled)) => {
                StatusCode::NOT_IMPLEMENTED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", err);
        }
        api_error(status, err.to_string())
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub blockchain_length: usize,
    pub peers: usize,
}

#[derive(Serialize)]
pub struct TransactionCreated {
    pub message: String,
    pub transaction_id: String,
}

#[derive(Serialize)]
pub struct TransactionList {
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub address: String,
    pub transactions: Vec<HistoryEntry>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

#[derive(Serialize)]
pub struct MineResponse {
    pub message: String,
    pub block_index: u64,
    pub block_hash: String,
    pub transactions: usize,
    pub time_ms: u128,
    pub attempts: u64,
}

#[derive(Serialize)]
pub struct MiningStarted {
    pub message: String,
    pub miner: String,
    pub difficulty: u32,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub stats: MiningOverview,
}

#[derive(Serialize)]
pub struct DifficultyResponse {
    pub message: String,
    pub difficulty: u32,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub chain_length: usize,
}

#[derive(Serialize)]
pub struct DiscoveryResponse {
    pub node_id: String,
    pub url: String,
    pub discovered: usize,
}

#[derive(Serialize)]
pub struct NotifyResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: NotificationOutcome,
}

#[derive(Serialize)]
pub struct PauseResponse {
    pub message: String,
    pub paused_at: f64,
}

#[derive(Serialize)]
pub struct ResumeResponse {
    pub message: String,
    pub resumed_at: f64,
    pub paused_for: Option<f64>,
    pub validation_result: Option<ValidationReport>,
}

#[derive(Serialize)]
pub struct CheckpointResponse {
    pub message: String,
    pub timestamp: f64,
    pub blockchain_length: usize,
}

#[derive(Serialize)]
pub struct ValidationResponse {
    #[serde(flatten)]
    pub report: ValidationReport,
    pub blockchain_length: usize,
    pub timestamp: f64,
}

#[derive(Serialize)]
pub struct ContractDeployed {
    pub message: String,
    pub contract_id: String,
}

#[derive(Serialize)]
pub struct ContractCalled {
    pub message: String,
    pub result: Value,
}

#[derive(Serialize)]
pub struct ContractList {
    pub contracts: Vec<String>,
    pub count: usize,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct ChainQuery {
    pub start: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct AddressQuery {
    pub address: String,
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct NewTransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    /// Carried as opaque metadata; never verified
    pub signature: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct DifficultyRequest {
    pub difficulty: u32,
}

#[derive(Deserialize, Default)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ResumeRequest {
    #[serde(default = "default_validate")]
    pub validate: bool,
}

fn default_validate() -> bool {
    true
}

#[derive(Deserialize)]
pub struct DeployContractRequest {
    pub code: String,
    pub owner: String,
    #[serde(default)]
    pub initial_balance: f64,
}

#[derive(Deserialize)]
pub struct CallContractRequest {
    pub method: String,
    pub sender: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub value: f64,
}

// ============================================================================
// Chain Handlers
// ============================================================================

/// GET /health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let info = state.node.info().await;
    Json(HealthResponse {
        status: "healthy",
        node_id: info.node_id,
        blockchain_length: info.chain_length,
        peers: info.peers.len(),
    })
}

/// GET /node/info
pub async fn node_info(State(state): State<ApiState>) -> Json<NodeInfo> {
    Json(state.node.info().await)
}

/// GET /blockchain?start=&limit=
pub async fn get_blockchain(
    State(state): State<ApiState>,
    Query(query): Query<ChainQuery>,
) -> Json<ChainPage> {
    Json(
        state
            .node
            .get_chain(query.start.unwrap_or(0), query.limit)
            .await,
    )
}

/// GET /block/{hash}
pub async fn get_block_by_hash(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<Block> {
    state
        .node
        .get_block_by_hash(&hash)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Block not found"))
}

/// GET /block/index/{index}
pub async fn get_block_by_index(
    State(state): State<ApiState>,
    Path(index): Path<u64>,
) -> ApiResult<Block> {
    state
        .node
        .get_block_by_index(index)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Block not found"))
}

// ============================================================================
// Transaction Handlers
// ============================================================================

/// POST /transaction/new
pub async fn new_transaction(
    State(state): State<ApiState>,
    Json(req): Json<NewTransactionRequest>,
) -> ApiResult<TransactionCreated> {
    if req.amount.is_nan() || req.amount <= 0.0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "Amount must be positive"));
    }

    let mut metadata = req.metadata;
    if let Some(signature) = req.signature {
        metadata.insert("signature".to_string(), signature);
    }
    let metadata = (!metadata.is_empty()).then_some(metadata);

    let transaction_id = state
        .node
        .submit_transaction(&req.sender, &req.recipient, req.amount, metadata)
        .await?;

    Ok(Json(TransactionCreated {
        message: "Transaction will be added to the next block".to_string(),
        transaction_id,
    }))
}

/// GET /transactions/pending
pub async fn pending_transactions(State(state): State<ApiState>) -> Json<TransactionList> {
    let transactions = state.node.pending_transactions().await;
    Json(TransactionList {
        count: transactions.len(),
        transactions,
    })
}

/// GET /transactions/history/{address}
pub async fn transaction_history(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<HistoryResponse> {
    let transactions = state.node.get_transaction_history(&address).await;
    Json(HistoryResponse {
        address,
        count: transactions.len(),
        transactions,
    })
}

/// GET /balance?address=
pub async fn get_balance(
    State(state): State<ApiState>,
    Query(query): Query<AddressQuery>,
) -> Json<BalanceResponse> {
    let balance = state.node.get_balance(&query.address).await;
    Json(BalanceResponse {
        address: query.address,
        balance,
    })
}

// ============================================================================
// Mining Handlers
// ============================================================================

/// GET /mine?address=
pub async fn mine(
    State(state): State<ApiState>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<MineResponse> {
    let mined = state.node.mine(&query.address).await?;
    Ok(Json(MineResponse {
        message: "New block mined".to_string(),
        block_index: mined.block.index,
        block_hash: mined.block.hash.clone(),
        transactions: mined.block.tx_count(),
        time_ms: mined.stats.time_ms,
        attempts: mined.stats.hash_attempts,
    }))
}

/// POST /mining/start
pub async fn start_mining(
    State(state): State<ApiState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<MiningStarted> {
    if req.address.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Mining address required"));
    }

    let started = state.node.start_mining(&req.address).await?;
    let message = if started {
        "Continuous mining started"
    } else {
        "Mining already in progress"
    };
    let difficulty = state.node.info().await.difficulty;
    Ok(Json(MiningStarted {
        message: message.to_string(),
        miner: req.address,
        difficulty,
    }))
}

/// POST /mining/stop
pub async fn stop_mining(State(state): State<ApiState>) -> Json<MessageResponse> {
    let message = if state.node.stop_mining().await {
        "Mining stopped"
    } else {
        "No mining in progress"
    };
    Json(MessageResponse {
        message: message.to_string(),
    })
}

/// GET /mining/stats
pub async fn mining_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.node.mining_stats().await,
    })
}

/// POST /mining/difficulty
pub async fn set_difficulty(
    State(state): State<ApiState>,
    Json(req): Json<DifficultyRequest>,
) -> Json<DifficultyResponse> {
    let difficulty = state.node.set_difficulty(req.difficulty).await;
    Json(DifficultyResponse {
        message: format!("Mining difficulty set to {}", difficulty),
        difficulty,
    })
}

// ============================================================================
// Peer Handlers
// ============================================================================

/// POST /nodes/register
pub async fn register_nodes(
    State(state): State<ApiState>,
    Json(req): Json<RegisterNodes>,
) -> ApiResult<RegisterResponse> {
    if req.nodes.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Please supply a valid list of nodes",
        ));
    }

    let outcome = state.node.register_peers(&req.nodes).await;
    Ok(Json(RegisterResponse {
        message: format!("Added {} new nodes", outcome.added),
        total_nodes: outcome.peers,
    }))
}

/// GET /nodes/list
pub async fn list_nodes(State(state): State<ApiState>) -> Json<PeerList> {
    let nodes = state.node.list_peers().await;
    Json(PeerList {
        count: nodes.len(),
        nodes,
    })
}

/// GET /nodes/resolve
pub async fn resolve_conflicts(State(state): State<ApiState>) -> ApiResult<ResolveResponse> {
    let replaced = state.node.resolve_conflicts().await?;
    let chain_length = state.node.info().await.chain_length;
    let message = if replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };
    Ok(Json(ResolveResponse {
        message: message.to_string(),
        replaced,
        chain_length,
    }))
}

/// GET /nodes/discovery
pub async fn discover_nodes(State(state): State<ApiState>) -> Json<DiscoveryResponse> {
    let discovered = state.node.consensus.discover_peers().await;
    Json(DiscoveryResponse {
        node_id: state.node.node_id.clone(),
        url: state.node.peers.self_url().to_string(),
        discovered,
    })
}

/// POST /block/notify/{index}
pub async fn notify_block(
    State(state): State<ApiState>,
    Path(block_index): Path<u64>,
    Json(notification): Json<BlockNotification>,
) -> Json<NotifyResponse> {
    let outcome = state
        .node
        .handle_block_notification(block_index, notification)
        .await;
    let message = match outcome {
        NotificationOutcome::WillSync { .. } => "Will sync with your chain",
        NotificationOutcome::UpToDate { .. } => "Already up to date",
    };
    Json(NotifyResponse {
        message: message.to_string(),
        outcome,
    })
}

// ============================================================================
// Lifecycle Handlers
// ============================================================================

/// POST /blockchain/pause
pub async fn pause(
    State(state): State<ApiState>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<PauseResponse> {
    let reason = req.reason.unwrap_or_else(|| "Manual pause".to_string());
    let metadata = state.node.pause(&reason).await?;
    Ok(Json(PauseResponse {
        message: format!("Blockchain paused: {}", reason),
        paused_at: metadata.timestamp,
    }))
}

/// POST /blockchain/resume
pub async fn resume(
    State(state): State<ApiState>,
    Json(req): Json<ResumeRequest>,
) -> ApiResult<ResumeResponse> {
    let outcome = state.node.resume(req.validate).await?;
    Ok(Json(ResumeResponse {
        message: "Blockchain resumed".to_string(),
        resumed_at: unix_timestamp(),
        paused_for: outcome.paused_for,
        validation_result: outcome.restore.report,
    }))
}

/// POST /blockchain/checkpoint
pub async fn create_checkpoint(
    State(state): State<ApiState>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<CheckpointResponse> {
    let reason = req.reason.unwrap_or_else(|| "Manual checkpoint".to_string());
    let metadata = state.node.create_checkpoint(&reason).await?;
    Ok(Json(CheckpointResponse {
        message: format!("Checkpoint created: {}", reason),
        timestamp: metadata.timestamp,
        blockchain_length: metadata.chain_length,
    }))
}

/// GET /blockchain/validate
pub async fn validate(State(state): State<ApiState>) -> Json<ValidationResponse> {
    let report = state.node.validate().await;
    let blockchain_length = state.node.info().await.chain_length;
    Json(ValidationResponse {
        report,
        blockchain_length,
        timestamp: unix_timestamp(),
    })
}

// ============================================================================
// Contract Handlers
// ============================================================================

/// POST /contracts/deploy
pub async fn deploy_contract(
    State(state): State<ApiState>,
    Json(req): Json<DeployContractRequest>,
) -> ApiResult<ContractDeployed> {
    let contract_id = state
        .node
        .deploy_contract(&req.code, &req.owner, req.initial_balance)
        .await?;
    Ok(Json(ContractDeployed {
        message: "Contract deployed successfully".to_string(),
        contract_id,
    }))
}

/// POST /contracts/call/{contract_id}
pub async fn call_contract(
    State(state): State<ApiState>,
    Path(contract_id): Path<String>,
    Json(req): Json<CallContractRequest>,
) -> ApiResult<ContractCalled> {
    let result = state
        .node
        .call_contract(&contract_id, &req.method, &req.sender, req.args, req.value)
        .await?;
    Ok(Json(ContractCalled {
        message: "Contract method called successfully".to_string(),
        result,
    }))
}

/// GET /contracts/state/{contract_id}
pub async fn get_contract_state(
    State(state): State<ApiState>,
    Path(contract_id): Path<String>,
) -> ApiResult<Value> {
    Ok(Json(state.node.get_contract_state(&contract_id).await?))
}

/// GET /contracts/list
pub async fn list_contracts(State(state): State<ApiState>) -> ApiResult<ContractList> {
    let contracts = state.node.list_contracts().await?;
    Ok(Json(ContractList {
        count: contracts.len(),
        contracts,
    }))
}
