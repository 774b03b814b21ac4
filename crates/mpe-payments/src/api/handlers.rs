//! HTTP API handlers.

use super::types::*;
use crate::error::PaymentError;
use crate::state_store::PaymentStateStore;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state for handlers.
pub struct ApiState {
    pub store: Arc<PaymentStateStore>,
}

impl ApiState {
    pub fn new(store: Arc<PaymentStateStore>) -> Self {
        Self { store }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the payment API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/payment", get(get_payment).put(record_tx_hash))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        payments: state.store.len().await,
    })
}

/// Look up one payment state.
async fn get_payment(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<PaymentResponse>, ApiError> {
    state
        .store
        .get(query.id)
        .await
        .map(|payment| Json(PaymentResponse::from(payment)))
        .ok_or_else(|| error_response(PaymentError::NotFound(query.id)))
}

/// Record the transaction a user paid with.
async fn record_tx_hash(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RecordTxRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = state
        .store
        .record_tx_hash(request.id, &request.tx_hash)
        .await
        .map_err(error_response)?;

    info!("Recorded tx {} for payment {}", request.tx_hash, request.id);
    Ok(Json(PaymentResponse::from(payment)))
}

fn error_response(e: PaymentError) -> ApiError {
    let (status, code) = match &e {
        PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        PaymentError::InvalidTransition { .. } => (StatusCode::CONFLICT, "NOT_PENDING"),
        PaymentError::InvalidTxHash(_) => (StatusCode::BAD_REQUEST, "INVALID_TX_HASH"),
        PaymentError::TxHashInUse(_) => (StatusCode::CONFLICT, "TX_HASH_IN_USE"),
        _ => {
            error!("Payment API error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };
    (status, Json(ErrorResponse::new(e.to_string(), code)))
}
