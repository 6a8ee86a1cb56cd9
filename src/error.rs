//! Error types for the Conduit relayer

use thiserror::Error;

/// Main error type for the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown contract: {0}")]
    UnknownContract(String),

    #[error("ABI error for {contract}.{method}: {message}")]
    Encoding {
        contract: String,
        method: String,
        message: String,
    },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a signed transaction never produced a real hash.
///
/// Carried inside a [`crate::tx::Submission`] next to the zero-hash sentinel
/// instead of being propagated: callers poll the returned hash, operators read
/// the reason from the logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitFailure {
    #[error("Node rejected transaction: {0}")]
    Rejected(String),

    #[error("Network error during submission: {0}")]
    Network(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;
