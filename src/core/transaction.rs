//! Transaction handling for the ledger
//!
//! Account-style transfers: a transaction moves `amount` from one address to
//! another. The transaction ID is the SHA-256 of the canonical (sorted-key
//! JSON) encoding of every field except the ID itself, so two submissions
//! with identical content collide and the second is treated as a replay.
//!
//! Signatures are not verified by the ledger; anything a wallet attaches
//! travels as opaque string metadata.

use crate::crypto::hash_canonical;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Sender used for mining rewards and keep-alive transactions
pub const NETWORK_ADDRESS: &str = "network";

/// Sender used for the genesis transaction and for bootstrapping funds
pub const GENESIS_ADDRESS: &str = "genesis";

/// `type` tag of mining reward transactions
pub const REWARD_TYPE: &str = "reward";

/// `type` tag of the zero-value transaction the miner submits when idle
pub const KEEP_ALIVE_TYPE: &str = "empty";

/// Field names owned by the transaction itself; metadata cannot shadow them
const RESERVED_KEYS: [&str; 6] = ["from", "to", "amount", "timestamp", "type", "id"];

/// Current wall-clock time as fractional UNIX seconds
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Returns true for the privileged senders allowed to create value
pub fn is_system_address(address: &str) -> bool {
    address == NETWORK_ADDRESS || address == GENESIS_ADDRESS
}

// =============================================================================
// Error Types
// =============================================================================

/// Reasons a transaction is refused at admission
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Negative amount: {0}")]
    NegativeAmount(f64),
    #[error("Amount is not a finite number: {0}")]
    NonFiniteAmount(f64),
    #[error("Insufficient funds: {address} has {balance}, needs {amount}")]
    InsufficientFunds {
        address: String,
        balance: f64,
        amount: f64,
    },
    #[error("Duplicate transaction: {0}")]
    Duplicate(String),
}

// =============================================================================
// Transaction
// =============================================================================

/// A value transfer between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: f64,
    /// Creation time, fractional UNIX seconds
    pub timestamp: f64,
    /// Optional type tag (`reward`, `empty`, `contract_call`, ...)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Free-form metadata folded into the canonical encoding
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Canonical hash of all other fields
    #[serde(default)]
    pub id: String,
}

impl Transaction {
    /// Create a transfer stamped with the current time.
    ///
    /// A `type` entry in `metadata` becomes the transaction's type tag.
    pub fn new(
        from: &str,
        to: &str,
        amount: f64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self::with_timestamp(from, to, amount, unix_timestamp(), metadata)
    }

    /// Create a transfer with an explicit timestamp
    pub fn with_timestamp(
        from: &str,
        to: &str,
        amount: f64,
        timestamp: f64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        let mut metadata = metadata.unwrap_or_default();
        let kind = metadata.remove("type");
        let mut tx = Self {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            timestamp,
            kind,
            metadata,
            id: String::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Mining reward paid by the network to `miner`
    pub fn reward(miner: &str, amount: f64) -> Self {
        let mut tx = Self::new(NETWORK_ADDRESS, miner, amount, None);
        tx.kind = Some(REWARD_TYPE.to_string());
        tx.id = tx.compute_id();
        tx
    }

    /// Canonical field map, with or without the `id` field
    fn canonical_fields(&self, include_id: bool) -> Map<String, Value> {
        let mut fields = Map::new();
        for (key, value) in &self.metadata {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                fields.insert(key.clone(), Value::String(value.clone()));
            }
        }
        fields.insert("from".into(), Value::String(self.from.clone()));
        fields.insert("to".into(), Value::String(self.to.clone()));
        fields.insert("amount".into(), Value::from(self.amount));
        fields.insert("timestamp".into(), Value::from(self.timestamp));
        if let Some(kind) = &self.kind {
            fields.insert("type".into(), Value::String(kind.clone()));
        }
        if include_id {
            fields.insert("id".into(), Value::String(self.id.clone()));
        }
        fields
    }

    /// Hash of every field except `id`
    pub fn compute_id(&self) -> String {
        hash_canonical(&Value::Object(self.canonical_fields(false)))
    }

    /// Hash of the full record, used as the merkle leaf
    pub fn leaf_hash(&self) -> String {
        hash_canonical(&Value::Object(self.canonical_fields(true)))
    }

    /// True if the sender is `network` or `genesis`
    pub fn is_system(&self) -> bool {
        is_system_address(&self.from)
    }

    /// True for the reward transaction of a mined block
    pub fn is_reward(&self) -> bool {
        self.from == NETWORK_ADDRESS && self.kind.as_deref() == Some(REWARD_TYPE)
    }

    /// Signed effect of this transaction on `address`
    pub fn balance_delta(&self, address: &str) -> f64 {
        let mut delta = 0.0;
        if self.from == address {
            delta -= self.amount;
        }
        if self.to == address {
            delta += self.amount;
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, None);
        let b = Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, None);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_id_excludes_itself() {
        let mut tx = Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, None);
        let original = tx.id.clone();
        tx.id = "something else".into();
        assert_eq!(tx.compute_id(), original);
        assert_ne!(tx.leaf_hash(), Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, None).leaf_hash());
    }

    #[test]
    fn test_every_field_changes_id() {
        let base = Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, None);
        let variants = [
            Transaction::with_timestamp("carol", "bob", 5.0, 1000.0, None),
            Transaction::with_timestamp("alice", "carol", 5.0, 1000.0, None),
            Transaction::with_timestamp("alice", "bob", 6.0, 1000.0, None),
            Transaction::with_timestamp("alice", "bob", 5.0, 1001.0, None),
            Transaction::with_timestamp("alice", "bob", 5.0, 1000.0, Some(meta(&[("note", "x")]))),
        ];
        for v in &variants {
            assert_ne!(v.id, base.id);
        }
    }

    #[test]
    fn test_type_metadata_becomes_kind() {
        let tx = Transaction::with_timestamp(
            "network",
            "miner",
            0.0,
            1.0,
            Some(meta(&[("type", KEEP_ALIVE_TYPE), ("note", "idle")])),
        );
        assert_eq!(tx.kind.as_deref(), Some(KEEP_ALIVE_TYPE));
        assert!(!tx.metadata.contains_key("type"));
        assert_eq!(tx.metadata.get("note").map(String::as_str), Some("idle"));
    }

    #[test]
    fn test_metadata_cannot_shadow_fields() {
        let plain = Transaction::with_timestamp("alice", "bob", 5.0, 1.0, None);
        let shadow =
            Transaction::with_timestamp("alice", "bob", 5.0, 1.0, Some(meta(&[("from", "eve")])));
        assert_eq!(plain.id, shadow.id);
    }

    #[test]
    fn test_reward_transaction() {
        let tx = Transaction::reward("miner1", 100.0);
        assert!(tx.is_reward());
        assert!(tx.is_system());
        assert_eq!(tx.balance_delta("miner1"), 100.0);
        assert_eq!(tx.balance_delta("network"), -100.0);
    }

    #[test]
    fn test_system_addresses() {
        assert!(is_system_address("network"));
        assert!(is_system_address("genesis"));
        assert!(!is_system_address("alice"));
    }
}
