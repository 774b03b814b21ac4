//! Payment error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the payment system.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Blockchain RPC call failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The escrow rejected a transfer because the token allowance is too low.
    #[error("Allowance exceeded: {0}")]
    AllowanceExceeded(String),

    /// A transaction was sent but its event never arrived.
    #[error("Channel operation did not confirm: {operation}")]
    NotConfirmed { operation: String },

    /// Transaction was mined but reverted.
    #[error("Transaction failed: {0}")]
    TxFailed(String),

    /// The provider daemon refused the payment.
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// The provider daemon could not be reached.
    #[error("Daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// Authorizing would sign for more than the channel holds.
    #[error("Insufficient channel value: signing {signed} exceeds {value}")]
    InsufficientChannelValue { signed: String, value: String },

    /// Malformed signing key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Signing or recovery failed.
    #[error("Signature error: {0}")]
    Signature(String),

    /// Invalid transaction hash.
    #[error("Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    /// Transaction already claimed by another payment.
    #[error("Transaction {0} is already recorded for another payment")]
    TxHashInUse(String),

    /// Payment state not found.
    #[error("Payment not found: {0}")]
    NotFound(Uuid),

    /// Payment state already left `pending`.
    #[error("Payment {id} is already {status}")]
    InvalidTransition { id: Uuid, status: String },

    /// Storage I/O error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PaymentError {
    fn from(e: std::io::Error) -> Self {
        PaymentError::Storage(e.to_string())
    }
}
