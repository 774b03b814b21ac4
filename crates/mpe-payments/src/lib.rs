//! MultiPartyEscrow payment channels for snet-bot.
//!
//! Pays SingularityNET services per call through escrow payment channels:
//! channels are opened, topped up and extended on-chain, and each call
//! carries an off-chain claim signed against the provider's ledger.
//!
//! # Architecture
//!
//! ```text
//! PaymentStrategy → PaymentEngine → EscrowChain (escrow contract)
//!                                 → DaemonClient (provider ledger, tokens)
//! User pays → PUT /api/payment → PaymentStateStore → watcher marks paid
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Channel classification, funding and claim signing
//! - [`strategy`] - Escrow and prepaid call metadata
//! - [`chain`] - Escrow contract access with bounded event waits
//! - [`daemon`] - Provider daemon payment RPCs
//! - [`signature`] - Signed message layouts
//! - [`state_store`] - Payment states requested from users
//! - [`api`] - HTTP API over payment states

pub mod api;
pub mod chain;
pub mod config;
pub mod contract;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod signature;
pub mod state_store;
pub mod strategy;
pub mod types;

pub use chain::{AlloyEscrowChain, EscrowChain, OnChainChannel, OpenChannelRequest};
pub use config::PaymentConfig;
pub use daemon::{DaemonClient, GrpcDaemonClient};
pub use engine::{classify, ChannelAction, EngineConfig, PaymentEngine};
pub use error::PaymentError;
pub use signature::{recover_signer, PaymentSigner};
pub use state_store::PaymentStateStore;
pub use strategy::{build_strategy, PaymentMetadata, PaymentStrategy, StrategyKind};
pub use types::{
    CallAuthorization, ExpectedTransfer, PaymentChannel, PaymentKey, PaymentState, PaymentStatus,
    PaymentUri, ServiceDescriptor,
};

use api::ApiState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Serve the admin API as a background task.
pub async fn spawn_admin_server(
    store: Arc<PaymentStateStore>,
    port: u16,
) -> Result<tokio::task::JoinHandle<Result<(), PaymentError>>, PaymentError> {
    let router = api::create_router(Arc::new(ApiState::new(store)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        PaymentError::Internal(format!("Failed to bind to {}: {}", addr, e))
    })?;

    info!("Payment API ready on {}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .map_err(|e| PaymentError::Internal(format!("Server error: {}", e)))
    });

    Ok(handle)
}

/// Periodically drop paid and expired states older than `retention`.
pub fn spawn_state_pruner(
    store: Arc<PaymentStateStore>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    info!("Pruning settled payment states older than {:?}", retention);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PRUNE_INTERVAL).await;

            match store.prune(retention).await {
                Ok(0) => debug!("No payment states to prune"),
                Ok(removed) => info!("Pruned {} payment states", removed),
                Err(e) => error!("Payment state prune failed: {}", e),
            }
        }
    })
}
