//! Chain validation
//!
//! Three levels of checking:
//! - [`validate_blocks`]: full recomputation for the local chain
//! - [`validate_external_chain`]: lighter structural checks on a peer's chain
//! - [`audit_chain`]: everything above plus index, timestamp and balance
//!   checks, collecting every issue instead of stopping at the first

use crate::core::block::Block;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// First rule a chain breaks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainViolation {
    #[error("chain is empty")]
    Empty,
    #[error("invalid hash in block {0}")]
    HashMismatch(u64),
    #[error("invalid previous hash in block {0}")]
    BrokenLink(u64),
    #[error("invalid merkle root in block {0}")]
    MerkleMismatch(u64),
    #[error("invalid proof of work in block {index} (difficulty {difficulty})")]
    InsufficientWork { index: u64, difficulty: u32 },
    #[error("invalid block index {index} at position {position}")]
    IndexMismatch { position: usize, index: u64 },
}

/// Outcome of a full chain audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

/// Validate a locally held chain.
///
/// Every non-genesis block must hash to its stored hash, link to its
/// predecessor, carry the recomputed merkle root and satisfy its own
/// difficulty.
pub fn validate_blocks(chain: &[Block]) -> Result<(), ChainViolation> {
    if chain.is_empty() {
        return Err(ChainViolation::Empty);
    }

    for pair in chain.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        if !current.verify_hash() {
            return Err(ChainViolation::HashMismatch(current.index));
        }
        if current.previous_hash != previous.hash {
            return Err(ChainViolation::BrokenLink(current.index));
        }
        if !current.verify_merkle_root() {
            return Err(ChainViolation::MerkleMismatch(current.index));
        }
        if !current.is_valid_pow() {
            return Err(ChainViolation::InsufficientWork {
                index: current.index,
                difficulty: current.difficulty,
            });
        }
    }

    Ok(())
}

/// Validate a chain received from a peer.
///
/// Checks linkage, the per-block difficulty prefix of the reported hash and
/// index continuity. Reported hashes and merkle roots are not recomputed.
pub fn validate_external_chain(chain: &[Block]) -> Result<(), ChainViolation> {
    if chain.is_empty() {
        return Err(ChainViolation::Empty);
    }

    for (position, pair) in chain.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        let position = position + 1;

        if current.previous_hash != previous.hash {
            return Err(ChainViolation::BrokenLink(current.index));
        }
        if !current.is_valid_pow() {
            return Err(ChainViolation::InsufficientWork {
                index: current.index,
                difficulty: current.difficulty,
            });
        }
        if current.index != position as u64 {
            return Err(ChainViolation::IndexMismatch {
                position,
                index: current.index,
            });
        }
    }

    Ok(())
}

/// Run [`validate_blocks`] and, if it passes, every additional check.
pub fn audit_chain(chain: &[Block]) -> ValidationReport {
    if let Err(violation) = validate_blocks(chain) {
        return ValidationReport::from_issues(vec![format!(
            "Chain integrity check failed: {}",
            violation
        )]);
    }

    let mut issues = Vec::new();

    for (position, block) in chain.iter().enumerate() {
        if block.index != position as u64 {
            issues.push(format!(
                "Block {} has wrong index: {}",
                position, block.index
            ));
        }
        if position > 0 && block.timestamp < chain[position - 1].timestamp {
            issues.push(format!(
                "Block {} has a timestamp before the previous block",
                position
            ));
        }
        if !block.verify_merkle_root() {
            issues.push(format!("Block {} has an inconsistent merkle root", position));
        }
        if !block.verify_hash() {
            issues.push(format!("Block {} has an inconsistent hash", position));
        }
    }

    let mut balances: HashMap<&str, f64> = HashMap::new();
    for block in chain {
        for tx in &block.transactions {
            *balances.entry(tx.to.as_str()).or_insert(0.0) += tx.amount;
            if tx.is_system() {
                continue;
            }
            let balance = balances.entry(tx.from.as_str()).or_insert(0.0);
            *balance -= tx.amount;
            if *balance < 0.0 {
                issues.push(format!(
                    "Negative balance for {} after transaction in block {}",
                    tx.from, block.index
                ));
            }
        }
    }

    ValidationReport::from_issues(issues)
}
