//! snet-bot - Main entry point.

use alloy::network::EthereumWallet;
use alloy::providers::ProviderBuilder;
use anyhow::Context;
use call_store::CallStore;
use grpc_invoke::{ConnectionManager, DynamicInvoker};
use matrix_client::{MatrixClient, MessageReceiver};
use mpe_payments::{
    build_strategy, spawn_admin_server, spawn_state_pruner, AlloyEscrowChain, EscrowChain,
    GrpcDaemonClient, PaymentEngine, PaymentSigner, PaymentStateStore,
};
use secrecy::ExposeSecret;
use snet_bot::orchestrator::{CallDispatcher, ChainConfirmer, GrpcHealthProbe};
use snet_bot::{AppResult, Config, FileCatalog, Orchestrator, OrchestratorConfig, Services};
use std::sync::Arc;
use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.bot.log_level);

    info!("Starting snet-bot...");

    // Payment identity and chain access
    let signer = Arc::new(
        PaymentSigner::from_hex(config.payments.private_key.expose_secret())
            .context("Invalid payments private key")?,
    );
    let escrow = config.payments.escrow().context("Invalid escrow address")?;
    let token = config.payments.token().context("Invalid token address")?;

    let rpc_url = config
        .payments
        .rpc_url
        .parse::<alloy::transports::http::reqwest::Url>()
        .context("Invalid payments RPC URL")?;
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer.signer().clone()))
        .connect_http(rpc_url);

    let alloy_chain = AlloyEscrowChain::new(provider, escrow, token, signer.address())
        .with_event_timeout(config.payments.event_timeout)
        .with_scan_from_block(config.payments.channel_scan_from_block);
    if !alloy_chain.health_check().await {
        error!("Ethereum RPC not reachable at {}", config.payments.rpc_url);
        return Err(anyhow::anyhow!("Ethereum RPC not reachable").into());
    }
    info!("Ethereum RPC healthy, paying from {}", signer.address());
    let chain: Arc<dyn EscrowChain> = Arc::new(alloy_chain);

    // Services and schemas
    let catalog = Arc::new(FileCatalog::load(&config.catalog.manifest, escrow).await?);
    info!("Catalog ready with {} services", catalog.len());

    let connections = ConnectionManager::new(config.grpc.connect_timeout, config.grpc.call_timeout);

    let engine = Arc::new(PaymentEngine::new(
        chain.clone(),
        Arc::new(GrpcDaemonClient::new(connections.clone())),
        signer.clone(),
        config.payments.engine_config(),
    ));
    let strategy = build_strategy(
        config.payments.strategy,
        engine,
        config.payments.prepaid_calls,
        config.payments.token_ttl,
    );
    info!("Payment strategy: {}", strategy.kind());

    // Payment states and their admin API
    let payments = PaymentStateStore::new(config.payments.storage_path.clone()).await?;
    let _admin = spawn_admin_server(payments.clone(), config.payments.server_port).await?;
    let _pruner = spawn_state_pruner(payments.clone(), config.payments.state_retention);

    // Chat transport
    let matrix = MatrixClient::new(
        &config.matrix.homeserver_url,
        config.matrix.access_token.clone(),
        &config.matrix.user_id,
    )
    .context("Failed to create Matrix client")?;

    if !matrix.health_check().await {
        error!("Matrix homeserver not reachable at {}", config.matrix.homeserver_url);
        return Err(anyhow::anyhow!("Matrix homeserver not reachable").into());
    }
    let whoami = matrix.whoami().await?;
    info!("Matrix healthy, logged in as {}", whoami.user_id);

    let messenger = Arc::new(matrix.clone());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_config(&config),
        CallStore::new(config.session.ttl),
        payments,
        Services {
            catalog: catalog.clone(),
            health: Arc::new(GrpcHealthProbe::new(connections.clone())),
            confirmer: Arc::new(ChainConfirmer::new(chain)),
            messenger: messenger.clone(),
            dispatcher: Arc::new(CallDispatcher::new(
                catalog,
                strategy,
                DynamicInvoker::new(connections),
                messenger,
            )),
        },
    );

    info!("Listening for messages...");

    // Start message receiver
    let receiver = MessageReceiver::new(matrix, config.matrix.sync_timeout);
    let mut stream = Box::pin(receiver.stream());

    // Main message loop
    loop {
        tokio::select! {
            Some(message) = stream.next() => {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator.handle(message).await;
                });
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
