//! Liveness and payment checks the orchestrator depends on.

use async_trait::async_trait;
use grpc_invoke::{check_serving, ConnectionManager};
use mpe_payments::{EscrowChain, PaymentError, PaymentUri};
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_serving(&self, url: &str) -> bool;
}

/// `grpc.health.v1` check over the shared pool.
pub struct GrpcHealthProbe {
    connections: ConnectionManager,
}

impl GrpcHealthProbe {
    pub fn new(connections: ConnectionManager) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl HealthProbe for GrpcHealthProbe {
    async fn is_serving(&self, url: &str) -> bool {
        match check_serving(&self.connections, url).await {
            Ok(serving) => serving,
            Err(e) => {
                warn!("Health check of {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    /// `Some(true)` once the transaction is mined and carries the transfer
    /// `uri` asks for.
    async fn transfer_status(
        &self,
        tx_hash: &str,
        uri: &PaymentUri,
    ) -> Result<Option<bool>, PaymentError>;
}

/// Reads receipts through the escrow chain's provider.
pub struct ChainConfirmer {
    chain: Arc<dyn EscrowChain>,
}

impl ChainConfirmer {
    pub fn new(chain: Arc<dyn EscrowChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl PaymentConfirmer for ChainConfirmer {
    async fn transfer_status(
        &self,
        tx_hash: &str,
        uri: &PaymentUri,
    ) -> Result<Option<bool>, PaymentError> {
        let expected = uri.expected_transfer()?;
        self.chain.transfer_status(tx_hash, &expected).await
    }
}
