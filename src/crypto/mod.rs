//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and canonical JSON digests
//! - Merkle root calculation

pub mod hash;
pub mod merkle;

pub use hash::{canonical_json, hash_canonical, meets_difficulty, sha256, sha256_hex};
pub use merkle::calculate_merkle_root;
