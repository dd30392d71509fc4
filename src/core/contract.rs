//! Smart contract engine interface
//!
//! The ledger never executes contract code itself. It forwards deploy, call
//! and state queries to an engine behind this trait, after moving any
//! attached value into the contract's account.

use serde_json::Value;
use thiserror::Error;

/// Contract engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    #[error("Contract not found: {0}")]
    NotFound(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Contract rejected: {0}")]
    Rejected(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// A sandboxed contract interpreter
pub trait ContractEngine: Send + Sync {
    /// Address a deployment of `code` by `owner` would receive
    fn contract_id(&self, code: &str, owner: &str) -> String;

    /// Install a contract and return its address
    fn deploy(&mut self, code: &str, owner: &str, initial_balance: f64)
        -> Result<String, ContractError>;

    /// Invoke `method` on a deployed contract
    fn call(
        &mut self,
        contract_id: &str,
        method: &str,
        sender: &str,
        args: Vec<Value>,
        value: f64,
    ) -> Result<Value, ContractError>;

    /// Current storage of a contract
    fn get_state(&self, contract_id: &str) -> Result<Value, ContractError>;

    /// Addresses of all deployed contracts
    fn list(&self) -> Vec<String>;
}
