//! Payment strategies: how an authorization travels with a call.

use crate::engine::PaymentEngine;
use crate::error::PaymentError;
use crate::types::{CallAuthorization, ServiceDescriptor};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tonic::metadata::{MetadataMap, MetadataValue};
use tracing::{debug, info};

pub const PAYMENT_TYPE: &str = "snet-payment-type";
pub const CHANNEL_ID: &str = "snet-payment-channel-id";
pub const CHANNEL_NONCE: &str = "snet-payment-channel-nonce";
pub const CHANNEL_AMOUNT: &str = "snet-payment-channel-amount";
pub const CHANNEL_SIGNATURE: &str = "snet-payment-channel-signature-bin";
pub const PREPAID_TOKEN: &str = "snet-prepaid-auth-token-bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Escrow,
    Prepaid,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Escrow => write!(f, "escrow"),
            StrategyKind::Prepaid => write!(f, "prepaid"),
        }
    }
}

/// Payment proof attached to one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMetadata {
    Escrow(CallAuthorization),
    Prepaid {
        channel_id: U256,
        nonce: U256,
        token: String,
    },
}

impl PaymentMetadata {
    pub fn to_metadata(&self) -> Result<MetadataMap, PaymentError> {
        let mut metadata = MetadataMap::new();
        match self {
            PaymentMetadata::Escrow(auth) => {
                metadata.insert(PAYMENT_TYPE, MetadataValue::from_static("escrow"));
                metadata.insert(CHANNEL_ID, ascii(auth.channel_id)?);
                metadata.insert(CHANNEL_NONCE, ascii(auth.nonce)?);
                metadata.insert(CHANNEL_AMOUNT, ascii(auth.amount)?);
                metadata.insert_bin(CHANNEL_SIGNATURE, MetadataValue::from_bytes(&auth.signature));
            }
            PaymentMetadata::Prepaid {
                channel_id,
                nonce,
                token,
            } => {
                metadata.insert(PAYMENT_TYPE, MetadataValue::from_static("prepaid-call"));
                metadata.insert(CHANNEL_ID, ascii(*channel_id)?);
                metadata.insert(CHANNEL_NONCE, ascii(*nonce)?);
                metadata.insert_bin(PREPAID_TOKEN, MetadataValue::from_bytes(token.as_bytes()));
            }
        }
        Ok(metadata)
    }
}

fn ascii(value: U256) -> Result<MetadataValue<tonic::metadata::Ascii>, PaymentError> {
    MetadataValue::try_from(value.to_string())
        .map_err(|e| PaymentError::Internal(format!("invalid metadata value: {}", e)))
}

/// Produces the payment metadata for a call to `service`.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn authorize(&self, service: &ServiceDescriptor) -> Result<PaymentMetadata, PaymentError>;
}

/// Signs a fresh claim for every call.
pub struct EscrowStrategy {
    engine: Arc<PaymentEngine>,
}

impl EscrowStrategy {
    pub fn new(engine: Arc<PaymentEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PaymentStrategy for EscrowStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Escrow
    }

    async fn authorize(&self, service: &ServiceDescriptor) -> Result<PaymentMetadata, PaymentError> {
        let mut channel = self.engine.prepare_channel(service, 1).await?;
        let auth = self.engine.sign_claim(&mut channel, service.price())?;
        debug!(
            "Authorized {} on channel {} (nonce {})",
            auth.amount, auth.channel_id, auth.nonce
        );
        Ok(PaymentMetadata::Escrow(auth))
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    channel_id: U256,
    token: String,
    nonce: U256,
    planned_amount: u64,
    used_amount: u64,
    issued_at: Instant,
}

impl CachedToken {
    fn covers(&self, price: u64, ttl: Duration) -> bool {
        self.used_amount.saturating_add(price) <= self.planned_amount
            && self.issued_at.elapsed() < ttl
    }
}

/// Tokens are bought per recipient and payment group.
type TokenKey = (Address, B256);

/// Buys a token for `call_count` calls and spends it down.
///
/// A call covered by a cached token touches neither the chain nor the
/// daemon. Concurrent calls on one channel may both miss the cache and buy
/// two tokens; the second simply replaces the first.
pub struct PrepaidStrategy {
    engine: Arc<PaymentEngine>,
    call_count: u64,
    token_ttl: Duration,
    tokens: Mutex<HashMap<TokenKey, CachedToken>>,
}

impl PrepaidStrategy {
    pub fn new(engine: Arc<PaymentEngine>, call_count: u64, token_ttl: Duration) -> Self {
        Self {
            engine,
            call_count: call_count.max(1),
            token_ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    async fn spend_cached(&self, key: &TokenKey, price: u64) -> Option<PaymentMetadata> {
        let mut tokens = self.tokens.lock().await;
        let cached = tokens.get_mut(key)?;
        if !cached.covers(price, self.token_ttl) {
            return None;
        }

        cached.used_amount += price;
        debug!(
            "Reusing token for channel {} ({}/{})",
            cached.channel_id, cached.used_amount, cached.planned_amount
        );
        Some(PaymentMetadata::Prepaid {
            channel_id: cached.channel_id,
            nonce: cached.nonce,
            token: cached.token.clone(),
        })
    }
}

#[async_trait]
impl PaymentStrategy for PrepaidStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Prepaid
    }

    async fn authorize(&self, service: &ServiceDescriptor) -> Result<PaymentMetadata, PaymentError> {
        let key = (service.payment_address, service.group_id);
        if let Some(metadata) = self.spend_cached(&key, service.price).await {
            return Ok(metadata);
        }

        let mut channel = self.engine.prepare_channel(service, self.call_count).await?;
        let amount = service.price() * U256::from(self.call_count);
        let auth = self.engine.sign_claim(&mut channel, amount)?;
        let reply = self.engine.request_token(service, &auth).await?;

        let cached = CachedToken {
            channel_id: channel.channel_id,
            token: reply.token.clone(),
            nonce: channel.nonce,
            planned_amount: reply.planned_amount,
            used_amount: reply.used_amount.saturating_add(service.price),
            issued_at: Instant::now(),
        };
        info!(
            "New token for channel {} planned {}",
            channel.channel_id, cached.planned_amount
        );
        self.tokens.lock().await.insert(key, cached);

        Ok(PaymentMetadata::Prepaid {
            channel_id: channel.channel_id,
            nonce: channel.nonce,
            token: reply.token,
        })
    }
}

pub fn build_strategy(
    kind: StrategyKind,
    engine: Arc<PaymentEngine>,
    prepaid_calls: u64,
    token_ttl: Duration,
) -> Arc<dyn PaymentStrategy> {
    match kind {
        StrategyKind::Escrow => Arc::new(EscrowStrategy::new(engine)),
        StrategyKind::Prepaid => Arc::new(PrepaidStrategy::new(engine, prepaid_calls, token_ttl)),
    }
}
