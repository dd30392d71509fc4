//! Networking module
//!
//! Peers are other nodes reachable over HTTP. Consensus is longest valid
//! chain wins; mined blocks are announced to every peer, and a peer that
//! learns it is behind fetches the sender's chain.

pub mod client;
pub mod consensus;
pub mod node;
pub mod peer;

pub use client::{
    BlockNotification, HttpPeerClient, PeerClient, PeerError, PeerList, RegisterNodes,
    CHAIN_FETCH_TIMEOUT, GOSSIP_TIMEOUT,
};
pub use consensus::{ConsensusAgent, NotificationOutcome, RegistrationOutcome};
pub use node::{MiningOverview, Node, NodeConfig, NodeError, NodeInfo};
pub use peer::{normalize_peer_url, PeerRegistry};
