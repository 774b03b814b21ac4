//! Payment channel protocol engine.
//!
//! Decides what a channel needs before a call, performs the on-chain
//! transactions for it, and signs claims against the provider's ledger.

use crate::chain::{EscrowChain, OnChainChannel, OpenChannelRequest};
use crate::daemon::{ChannelStateRequest, DaemonChannelState, DaemonClient, TokenReply, TokenRequest};
use crate::error::PaymentError;
use crate::signature::{channel_state_message, claim_message, token_message, PaymentSigner};
use crate::types::{CallAuthorization, PaymentChannel, ServiceDescriptor};
use alloy::primitives::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const STATE_FETCH_ATTEMPTS: usize = 5;
pub const STATE_FETCH_BACKOFF: Duration = Duration::from_secs(2);

/// What an existing channel needs before it can pay for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Funded and not expiring; no transaction.
    Reuse,
    /// Valid but short of funds.
    AddFunds { amount: U256 },
    /// Expiring, possibly also short of funds; one transaction either way.
    ExtendAndAddFunds { expiration: u64, amount: U256 },
}

/// Classify `channel` against the funds and lifetime a call requires.
///
/// The channel is valid when `expiration` exceeds `current_block + threshold`.
pub fn classify(
    channel: &PaymentChannel,
    required: U256,
    current_block: u64,
    threshold: u64,
    new_expiration: u64,
) -> ChannelAction {
    let available = channel.available();
    let shortfall = required.saturating_sub(available);
    let sufficient = shortfall.is_zero();
    let valid = channel.expiration > current_block.saturating_add(threshold);

    match (sufficient, valid) {
        (true, true) => ChannelAction::Reuse,
        (false, true) => ChannelAction::AddFunds { amount: shortfall },
        (_, false) => ChannelAction::ExtendAndAddFunds {
            expiration: new_expiration,
            amount: shortfall,
        },
    }
}

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Blocks added on top of the provider's threshold when extending.
    pub expiration_buffer_blocks: u64,
    /// Allowance granted to the escrow after an allowance revert.
    pub approve_amount: U256,
    pub state_fetch_attempts: usize,
    pub state_fetch_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiration_buffer_blocks: 240,
            approve_amount: U256::from(1_000_000_000_000_000_000u64),
            state_fetch_attempts: STATE_FETCH_ATTEMPTS,
            state_fetch_backoff: STATE_FETCH_BACKOFF,
        }
    }
}

/// Drives channels for one sender key.
pub struct PaymentEngine {
    chain: Arc<dyn EscrowChain>,
    daemon: Arc<dyn DaemonClient>,
    signer: Arc<PaymentSigner>,
    config: EngineConfig,
}

impl PaymentEngine {
    pub fn new(
        chain: Arc<dyn EscrowChain>,
        daemon: Arc<dyn DaemonClient>,
        signer: Arc<PaymentSigner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            chain,
            daemon,
            signer,
            config,
        }
    }

    pub fn signer(&self) -> &PaymentSigner {
        &self.signer
    }

    pub async fn current_block(&self) -> Result<u64, PaymentError> {
        self.chain.current_block().await
    }

    /// Return a channel that can pay for `call_count` calls of `service`.
    ///
    /// Opens, tops up or extends the channel as needed.
    #[instrument(skip(self, service), fields(org = %service.org_id, service = %service.service_id))]
    pub async fn prepare_channel(
        &self,
        service: &ServiceDescriptor,
        call_count: u64,
    ) -> Result<PaymentChannel, PaymentError> {
        let required = service.price() * U256::from(call_count);
        let current_block = self.chain.current_block().await?;
        let new_expiration = current_block
            .saturating_add(service.expiration_threshold)
            .saturating_add(self.config.expiration_buffer_blocks);

        let Some(on_chain) = self
            .chain
            .find_channel(service.payment_address, service.group_id)
            .await?
        else {
            return self.open(service, required, new_expiration).await;
        };

        let state = self
            .fetch_state(service, on_chain.channel_id, current_block)
            .await?;
        let mut channel = merge(on_chain, state);

        let action = classify(
            &channel,
            required,
            current_block,
            service.expiration_threshold,
            new_expiration,
        );
        debug!("Channel {} action: {:?}", channel.channel_id, action);
        self.apply(&mut channel, action).await?;

        Ok(channel)
    }

    /// Sign a claim for `amount` more than the channel's signed amount.
    pub fn sign_claim(
        &self,
        channel: &mut PaymentChannel,
        amount: U256,
    ) -> Result<CallAuthorization, PaymentError> {
        let signed = channel.signed_amount + amount;
        if signed > channel.value {
            return Err(PaymentError::InsufficientChannelValue {
                signed: signed.to_string(),
                value: channel.value.to_string(),
            });
        }

        let message = claim_message(
            self.chain.escrow_address(),
            channel.channel_id,
            channel.nonce,
            signed,
        );
        let signature = self.signer.sign(&message)?;
        channel.signed_amount = signed;

        Ok(CallAuthorization {
            channel_id: channel.channel_id,
            nonce: channel.nonce,
            amount: signed,
            signature,
        })
    }

    /// Exchange a claim for a prepaid token.
    #[instrument(skip(self, service, authorization))]
    pub async fn request_token(
        &self,
        service: &ServiceDescriptor,
        authorization: &CallAuthorization,
    ) -> Result<TokenReply, PaymentError> {
        let current_block = self.chain.current_block().await?;
        let signature = self
            .signer
            .sign(&token_message(&authorization.signature, current_block))?;

        let request = TokenRequest {
            channel_id: authorization.channel_id.saturating_to(),
            current_nonce: authorization.nonce.saturating_to(),
            signed_amount: authorization.amount.saturating_to(),
            signature,
            current_block,
            claim_signature: authorization.signature.clone(),
        };

        let reply = self.daemon.get_token(&service.url, request).await?;
        info!(
            "Token issued for channel {} (planned {}, used {})",
            reply.channel_id, reply.planned_amount, reply.used_amount
        );
        Ok(reply)
    }

    async fn open(
        &self,
        service: &ServiceDescriptor,
        required: U256,
        expiration: u64,
    ) -> Result<PaymentChannel, PaymentError> {
        let request = OpenChannelRequest {
            recipient: service.payment_address,
            group_id: service.group_id,
            value: required,
            expiration,
        };

        let balance = self.chain.escrow_balance().await?;
        let opened = if balance >= required {
            info!("Opening channel from escrow balance {}", balance);
            self.chain.open_channel(request).await?
        } else {
            info!("Escrow balance {} below {}, depositing", balance, required);
            match self.chain.deposit_and_open_channel(request).await {
                Err(PaymentError::AllowanceExceeded(reason)) => {
                    warn!("Allowance too low ({}), approving", reason);
                    self.chain.approve_escrow(self.config.approve_amount).await?;
                    self.chain.deposit_and_open_channel(request).await?
                }
                other => other?,
            }
        };

        let current_block = self.chain.current_block().await?;
        let state = self
            .fetch_state_with_retry(service, opened.channel_id, current_block)
            .await?;

        Ok(merge(opened, state))
    }

    async fn apply(&self, channel: &mut PaymentChannel, action: ChannelAction) -> Result<(), PaymentError> {
        match action {
            ChannelAction::Reuse => {}
            ChannelAction::AddFunds { amount } => {
                self.ensure_escrow_balance(amount).await?;
                self.chain.add_funds(channel.channel_id, amount).await?;
                channel.value += amount;
                info!("Added {} to channel {}", amount, channel.channel_id);
            }
            ChannelAction::ExtendAndAddFunds { expiration, amount } => {
                self.ensure_escrow_balance(amount).await?;
                self.chain
                    .extend_and_add_funds(channel.channel_id, expiration, amount)
                    .await?;
                channel.value += amount;
                channel.expiration = expiration;
                info!(
                    "Extended channel {} to block {} adding {}",
                    channel.channel_id, expiration, amount
                );
            }
        }
        Ok(())
    }

    /// Deposit the shortfall when the escrow balance cannot cover `amount`.
    async fn ensure_escrow_balance(&self, amount: U256) -> Result<(), PaymentError> {
        if amount.is_zero() {
            return Ok(());
        }

        let balance = self.chain.escrow_balance().await?;
        if balance >= amount {
            return Ok(());
        }

        let shortfall = amount - balance;
        match self.chain.deposit(shortfall).await {
            Err(PaymentError::AllowanceExceeded(reason)) => {
                warn!("Allowance too low ({}), approving", reason);
                self.chain.approve_escrow(self.config.approve_amount).await?;
                self.chain.deposit(shortfall).await
            }
            other => other,
        }
    }

    async fn fetch_state(
        &self,
        service: &ServiceDescriptor,
        channel_id: U256,
        current_block: u64,
    ) -> Result<DaemonChannelState, PaymentError> {
        let message = channel_state_message(self.chain.escrow_address(), channel_id, current_block);
        let request = ChannelStateRequest {
            channel_id: channel_id.to_be_bytes::<32>().to_vec(),
            signature: self.signer.sign(&message)?,
            current_block,
        };

        let reply = self.daemon.channel_state(&service.url, request).await?;
        Ok(DaemonChannelState::from(&reply))
    }

    /// The daemon may not have seen a fresh channel yet.
    async fn fetch_state_with_retry(
        &self,
        service: &ServiceDescriptor,
        channel_id: U256,
        current_block: u64,
    ) -> Result<DaemonChannelState, PaymentError> {
        let attempts = self.config.state_fetch_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch_state(service, channel_id, current_block).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    debug!("Channel state attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.state_fetch_backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PaymentError::Internal("channel state fetch made no attempts".to_string())
        }))
    }
}

fn merge(on_chain: OnChainChannel, state: DaemonChannelState) -> PaymentChannel {
    PaymentChannel {
        channel_id: on_chain.channel_id,
        nonce: state.nonce,
        sender: on_chain.sender,
        signer: on_chain.signer,
        recipient: on_chain.recipient,
        group_id: on_chain.group_id,
        value: on_chain.value,
        expiration: on_chain.expiration,
        signed_amount: state.signed_amount,
    }
}
