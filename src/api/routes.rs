//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/node/info", get(handlers::node_info))
        // Chain
        .route("/blockchain", get(handlers::get_blockchain))
        .route("/block/{hash}", get(handlers::get_block_by_hash))
        .route("/block/index/{index}", get(handlers::get_block_by_index))
        // Transactions
        .route("/transaction/new", post(handlers::new_transaction))
        .route("/transactions/pending", get(handlers::pending_transactions))
        .route(
            "/transactions/history/{address}",
            get(handlers::transaction_history),
        )
        .route("/balance", get(handlers::get_balance))
        // Mining
        .route("/mine", get(handlers::mine))
        .route("/mining/start", post(handlers::start_mining))
        .route("/mining/stop", post(handlers::stop_mining))
        .route("/mining/stats", get(handlers::mining_stats))
        .route("/mining/difficulty", post(handlers::set_difficulty))
        // Peers
        .route("/nodes/register", post(handlers::register_nodes))
        .route("/nodes/list", get(handlers::list_nodes))
        .route("/nodes/resolve", get(handlers::resolve_conflicts))
        .route("/nodes/discovery", get(handlers::discover_nodes))
        .route("/block/notify/{index}", post(handlers::notify_block))
        // Lifecycle
        .route("/blockchain/pause", post(handlers::pause))
        .route("/blockchain/resume", post(handlers::resume))
        .route("/blockchain/checkpoint", post(handlers::create_checkpoint))
        .route("/blockchain/validate", get(handlers::validate))
        // Contracts
        .route("/contracts/deploy", post(handlers::deploy_contract))
        .route("/contracts/call/{contract_id}", post(handlers::call_contract))
        .route(
            "/contracts/state/{contract_id}",
            get(handlers::get_contract_state),
        )
        .route("/contracts/list", get(handlers::list_contracts))
        .with_state(state)
        .layer(cors)
}
