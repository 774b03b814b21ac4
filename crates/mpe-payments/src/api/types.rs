//! API request/response types.

use crate::types::PaymentState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query of `GET /api/payment`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentQuery {
    pub id: Uuid,
}

/// Body of `PUT /api/payment`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordTxRequest {
    pub id: Uuid,
    pub tx_hash: String,
}

/// Payment state with its rendered URI.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub state: PaymentState,
    pub payment_uri: String,
}

impl From<PaymentState> for PaymentResponse {
    fn from(state: PaymentState) -> Self {
        let payment_uri = state.uri.to_string();
        Self { state, payment_uri }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub payments: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}
