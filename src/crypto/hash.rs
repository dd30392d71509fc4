//! Cryptographic hashing utilities for the ledger
//!
//! Provides SHA-256 based hashing used for block hashes, transaction IDs,
//! merkle roots and the whole-chain integrity digest.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Canonical JSON encoding of a value.
///
/// `serde_json` maps are ordered by key, so a `Value` always prints with
/// sorted keys and the output is stable across nodes. Taking a `Value`
/// keeps the encoding infallible: callers build the map themselves.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Checks if a hex hash meets the difficulty target.
/// The hash must start with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}
