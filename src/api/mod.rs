//! REST API module
//!
//! HTTP interface of a node. Peers use the same endpoints to sync.
//!
//! # Endpoints
//!
//! ## Chain
//! - `GET /blockchain?start=&limit=` - Chain page (also the peer sync format)
//! - `GET /block/{hash}` / `GET /block/index/{index}` - Single block
//!
//! ## Transactions
//! - `POST /transaction/new` - Submit a transfer
//! - `GET /transactions/pending` - Mempool
//! - `GET /transactions/history/{address}` - Confirmed history
//! - `GET /balance?address=` - Confirmed balance
//!
//! ## Mining
//! - `GET /mine?address=` - Mine one block
//! - `POST /mining/start` / `POST /mining/stop` - Continuous mining
//! - `GET /mining/stats` / `POST /mining/difficulty`
//!
//! ## Peers
//! - `POST /nodes/register` / `GET /nodes/list` / `GET /nodes/resolve`
//! - `GET /nodes/discovery` - Run one discovery round
//! - `POST /block/notify/{index}` - New block announcement
//!
//! ## Lifecycle
//! - `POST /blockchain/pause` / `POST /blockchain/resume`
//! - `POST /blockchain/checkpoint` / `GET /blockchain/validate`
//!
//! ## Contracts
//! - `POST /contracts/deploy` / `POST /contracts/call/{id}`
//! - `GET /contracts/state/{id}` / `GET /contracts/list`

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
