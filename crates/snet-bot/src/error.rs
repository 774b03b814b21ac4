//! Application error types.

use thiserror::Error;

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Matrix error: {0}")]
    Matrix(#[from] matrix_client::MatrixError),

    #[error("Payment error: {0}")]
    Payment(#[from] mpe_payments::PaymentError),

    #[error("Invocation error: {0}")]
    Invoke(#[from] grpc_invoke::InvokeError),

    #[error("Session error: {0}")]
    Session(#[from] call_store::CallStoreError),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

/// Result type alias for application errors.
pub type AppResult<T> = Result<T, AppError>;
