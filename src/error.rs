//! Error types for ledgerloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in ledgerloop
#[derive(Debug, Error)]
pub enum LedgerLoopError {
    /// Ledger content violates an invariant (duplicate ids, empty criteria)
    #[error("Invalid ledger: {0}")]
    InvalidLedger(String),

    /// Deliverable not found in the ledger
    #[error("Deliverable not found: {0}")]
    DeliverableNotFound(String),

    /// Ledger storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Agent session failed before producing an outcome
    #[error("Session error: {0}")]
    Session(String),

    /// No instruction text registered under the requested name
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ledgerloop operations
pub type Result<T> = std::result::Result<T, LedgerLoopError>;
