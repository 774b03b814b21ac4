//! Escrow contract access.
//!
//! State-changing calls install an event watcher before the transaction is
//! sent and then wait for the matching event for at most `event_timeout`.

use crate::contract::MultiPartyEscrow::{
    self, ChannelAddFunds, ChannelExtend, ChannelOpen, DepositFunds,
};
use crate::contract::EscrowToken::{self, Transfer};
use crate::error::PaymentError;
use crate::types::ExpectedTransfer;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Channel fields as stored by the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainChannel {
    pub channel_id: U256,
    pub nonce: U256,
    pub sender: Address,
    pub signer: Address,
    pub recipient: Address,
    pub group_id: B256,
    pub value: U256,
    pub expiration: u64,
}

/// Parameters for opening a channel signed by the sender itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenChannelRequest {
    pub recipient: Address,
    pub group_id: B256,
    pub value: U256,
    pub expiration: u64,
}

/// Operations the payment engine needs from the escrow contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscrowChain: Send + Sync {
    fn escrow_address(&self) -> Address;

    /// Address that pays into channels.
    fn sender_address(&self) -> Address;

    async fn current_block(&self) -> Result<u64, PaymentError>;

    /// Sender's unallocated escrow balance.
    async fn escrow_balance(&self) -> Result<U256, PaymentError>;

    /// Most recent channel from the sender to `recipient` in `group_id`.
    async fn find_channel(
        &self,
        recipient: Address,
        group_id: B256,
    ) -> Result<Option<OnChainChannel>, PaymentError>;

    /// Open a channel funded from the escrow balance.
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<OnChainChannel, PaymentError>;

    /// Deposit tokens and open a channel in one transaction.
    async fn deposit_and_open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> Result<OnChainChannel, PaymentError>;

    /// Approve the escrow to pull `amount` tokens, waiting for the receipt.
    async fn approve_escrow(&self, amount: U256) -> Result<(), PaymentError>;

    async fn deposit(&self, amount: U256) -> Result<(), PaymentError>;

    async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<(), PaymentError>;

    async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        expiration: u64,
        amount: U256,
    ) -> Result<(), PaymentError>;

    /// Whether `tx_hash` settled `expected`: `None` while unknown or
    /// pending, `Some(false)` when reverted or carrying no matching transfer.
    async fn transfer_status(
        &self,
        tx_hash: &str,
        expected: &ExpectedTransfer,
    ) -> Result<Option<bool>, PaymentError>;
}

/// A spawned log watcher feeding the first matching event into a oneshot.
struct EventWatch<E> {
    receiver: oneshot::Receiver<E>,
    task: JoinHandle<()>,
    operation: &'static str,
}

impl<E> EventWatch<E> {
    async fn wait(mut self, timeout: Duration) -> Result<E, PaymentError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => {
                warn!("Event watcher for {} ended without a match", self.operation);
                Err(PaymentError::NotConfirmed {
                    operation: self.operation.to_string(),
                })
            }
            Err(_) => {
                warn!("No event for {} within {:?}", self.operation, timeout);
                Err(PaymentError::NotConfirmed {
                    operation: self.operation.to_string(),
                })
            }
        }
    }
}

impl<E> Drop for EventWatch<E> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`EscrowChain`] over an alloy provider with a wallet for the sender.
pub struct AlloyEscrowChain<P> {
    provider: P,
    escrow: Address,
    token: Address,
    sender: Address,
    event_timeout: Duration,
    scan_from_block: u64,
}

impl<P: Provider + 'static> AlloyEscrowChain<P> {
    pub fn new(provider: P, escrow: Address, token: Address, sender: Address) -> Self {
        Self {
            provider,
            escrow,
            token,
            sender,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            scan_from_block: 0,
        }
    }

    pub fn with_event_timeout(mut self, event_timeout: Duration) -> Self {
        self.event_timeout = event_timeout;
        self
    }

    /// First block searched for `ChannelOpen` logs.
    pub fn with_scan_from_block(mut self, block: u64) -> Self {
        self.scan_from_block = block;
        self
    }

    /// Check RPC connectivity.
    pub async fn health_check(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }

    async fn watch<E>(
        &self,
        operation: &'static str,
        matches: impl Fn(&E) -> bool + Send + 'static,
    ) -> Result<EventWatch<E>, PaymentError>
    where
        E: SolEvent + Send + 'static,
    {
        let filter = Filter::new()
            .address(self.escrow)
            .event_signature(E::SIGNATURE_HASH);

        let poller = self
            .provider
            .watch_logs(&filter)
            .await
            .map_err(|e| PaymentError::Rpc(format!("install {} filter: {}", E::SIGNATURE, e)))?
            .with_poll_interval(EVENT_POLL_INTERVAL);

        let (sender, receiver) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut logs = poller.into_stream().flat_map(futures::stream::iter);
            while let Some(log) = logs.next().await {
                match log.log_decode::<E>() {
                    Ok(decoded) if matches(&decoded.inner.data) => {
                        let _ = sender.send(decoded.inner.data);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Skipping undecodable log: {}", e),
                }
            }
        });

        Ok(EventWatch {
            receiver,
            task,
            operation,
        })
    }

    async fn open(
        &self,
        request: OpenChannelRequest,
        with_deposit: bool,
    ) -> Result<OnChainChannel, PaymentError> {
        let operation = if with_deposit {
            "depositAndOpenChannel"
        } else {
            "openChannel"
        };
        let sender = self.sender;
        let watch = self
            .watch::<ChannelOpen>(operation, move |event| {
                event.sender == sender
                    && event.recipient == request.recipient
                    && event.groupId == request.group_id
            })
            .await?;

        let contract = MultiPartyEscrow::new(self.escrow, &self.provider);
        let expiration = U256::from(request.expiration);
        let sent = if with_deposit {
            contract
                .depositAndOpenChannel(
                    sender,
                    request.recipient,
                    request.group_id,
                    request.value,
                    expiration,
                )
                .send()
                .await
        } else {
            contract
                .openChannel(
                    sender,
                    request.recipient,
                    request.group_id,
                    request.value,
                    expiration,
                )
                .send()
                .await
        };
        let pending = sent.map_err(|e| contract_error(operation, e))?;
        info!("{} sent: {}", operation, pending.tx_hash());

        let event = watch.wait(self.event_timeout).await?;
        info!("Channel {} opened", event.channelId);

        Ok(OnChainChannel {
            channel_id: event.channelId,
            nonce: event.nonce,
            sender: event.sender,
            signer: event.signer,
            recipient: event.recipient,
            group_id: event.groupId,
            value: event.amount,
            expiration: event.expiration.saturating_to(),
        })
    }
}

#[async_trait]
impl<P: Provider + 'static> EscrowChain for AlloyEscrowChain<P> {
    fn escrow_address(&self) -> Address {
        self.escrow
    }

    fn sender_address(&self) -> Address {
        self.sender
    }

    async fn current_block(&self) -> Result<u64, PaymentError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| PaymentError::Rpc(format!("eth_blockNumber: {}", e)))
    }

    async fn escrow_balance(&self) -> Result<U256, PaymentError> {
        MultiPartyEscrow::new(self.escrow, &self.provider)
            .balances(self.sender)
            .call()
            .await
            .map_err(|e| PaymentError::Rpc(format!("balances failed: {}", e)))
    }

    #[instrument(skip(self))]
    async fn find_channel(
        &self,
        recipient: Address,
        group_id: B256,
    ) -> Result<Option<OnChainChannel>, PaymentError> {
        let filter = Filter::new()
            .address(self.escrow)
            .event_signature(ChannelOpen::SIGNATURE_HASH)
            .topic1(self.sender.into_word())
            .topic2(recipient.into_word())
            .topic3(group_id)
            .from_block(self.scan_from_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| PaymentError::Rpc(format!("ChannelOpen logs: {}", e)))?;

        let Some(latest) = logs
            .iter()
            .rev()
            .find_map(|log| log.log_decode::<ChannelOpen>().ok())
        else {
            debug!("No channel to {} in group {}", recipient, group_id);
            return Ok(None);
        };

        let channel_id = latest.inner.data.channelId;
        let stored = MultiPartyEscrow::new(self.escrow, &self.provider)
            .channels(channel_id)
            .call()
            .await
            .map_err(|e| PaymentError::Rpc(format!("channels({}) failed: {}", channel_id, e)))?;

        if stored.recipient != recipient || stored.sender != self.sender {
            debug!("Channel {} no longer matches, treating as absent", channel_id);
            return Ok(None);
        }

        Ok(Some(OnChainChannel {
            channel_id,
            nonce: stored.nonce,
            sender: stored.sender,
            signer: stored.signer,
            recipient: stored.recipient,
            group_id: stored.groupId,
            value: stored.value,
            expiration: stored.expiration.saturating_to(),
        }))
    }

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<OnChainChannel, PaymentError> {
        self.open(request, false).await
    }

    async fn deposit_and_open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> Result<OnChainChannel, PaymentError> {
        self.open(request, true).await
    }

    #[instrument(skip(self))]
    async fn approve_escrow(&self, amount: U256) -> Result<(), PaymentError> {
        let pending = EscrowToken::new(self.token, &self.provider)
            .approve(self.escrow, amount)
            .send()
            .await
            .map_err(|e| PaymentError::Rpc(format!("approve send failed: {}", e)))?;

        let receipt = pending
            .with_timeout(Some(self.event_timeout))
            .get_receipt()
            .await
            .map_err(|e| {
                warn!("approve receipt failed: {}", e);
                PaymentError::NotConfirmed {
                    operation: "approve".to_string(),
                }
            })?;

        if !receipt.status() {
            return Err(PaymentError::TxFailed("approve reverted".to_string()));
        }

        info!("Approved escrow for {}", amount);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deposit(&self, amount: U256) -> Result<(), PaymentError> {
        let sender = self.sender;
        let watch = self
            .watch::<DepositFunds>("deposit", move |event| event.sender == sender)
            .await?;

        let pending = MultiPartyEscrow::new(self.escrow, &self.provider)
            .deposit(amount)
            .send()
            .await
            .map_err(|e| contract_error("deposit", e))?;
        info!("deposit sent: {}", pending.tx_hash());

        watch.wait(self.event_timeout).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<(), PaymentError> {
        let watch = self
            .watch::<ChannelAddFunds>("channelAddFunds", move |event| {
                event.channelId == channel_id
            })
            .await?;

        let pending = MultiPartyEscrow::new(self.escrow, &self.provider)
            .channelAddFunds(channel_id, amount)
            .send()
            .await
            .map_err(|e| contract_error("channelAddFunds", e))?;
        info!("channelAddFunds sent: {}", pending.tx_hash());

        watch.wait(self.event_timeout).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        expiration: u64,
        amount: U256,
    ) -> Result<(), PaymentError> {
        let watch = self
            .watch::<ChannelExtend>("channelExtendAndAddFunds", move |event| {
                event.channelId == channel_id
            })
            .await?;

        let pending = MultiPartyEscrow::new(self.escrow, &self.provider)
            .channelExtendAndAddFunds(channel_id, U256::from(expiration), amount)
            .send()
            .await
            .map_err(|e| contract_error("channelExtendAndAddFunds", e))?;
        info!("channelExtendAndAddFunds sent: {}", pending.tx_hash());

        watch.wait(self.event_timeout).await?;
        Ok(())
    }

    async fn transfer_status(
        &self,
        tx_hash: &str,
        expected: &ExpectedTransfer,
    ) -> Result<Option<bool>, PaymentError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| PaymentError::InvalidTxHash(tx_hash.to_string()))?;

        let Some(receipt) = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| PaymentError::Rpc(format!("receipt for {}: {}", tx_hash, e)))?
        else {
            return Ok(None);
        };

        if !receipt.status() {
            return Ok(Some(false));
        }
        let paid = contains_transfer(receipt.inner.logs(), expected);
        if !paid {
            warn!("Transaction {} carries no transfer matching {:?}", tx_hash, expected);
        }
        Ok(Some(paid))
    }
}

/// Any `Transfer` log of `expected.token` to the recipient for at least the amount.
pub fn contains_transfer(logs: &[Log], expected: &ExpectedTransfer) -> bool {
    logs.iter()
        .filter(|log| log.address() == expected.token)
        .filter_map(|log| log.log_decode::<Transfer>().ok())
        .any(|transfer| {
            transfer.inner.data.to == expected.recipient
                && transfer.inner.data.value >= expected.amount
        })
}

fn contract_error(operation: &str, error: alloy::contract::Error) -> PaymentError {
    let message = error.to_string();
    if message.to_lowercase().contains("allowance") {
        PaymentError::AllowanceExceeded(format!("{}: {}", operation, message))
    } else {
        PaymentError::Rpc(format!("{} failed: {}", operation, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: Address = Address::repeat_byte(0x5b);
    const RECIPIENT: Address = Address::repeat_byte(0x11);

    fn transfer_log(token: Address, to: Address, value: u64) -> Log {
        let event = Transfer {
            from: Address::repeat_byte(0x33),
            to,
            value: U256::from(value),
        };
        Log {
            inner: alloy::primitives::Log {
                address: token,
                data: event.encode_log_data(),
            },
            ..Default::default()
        }
    }

    fn expected(amount: u64) -> ExpectedTransfer {
        ExpectedTransfer {
            token: TOKEN,
            recipient: RECIPIENT,
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_matching_transfer() {
        let logs = vec![transfer_log(TOKEN, RECIPIENT, 100)];

        assert!(contains_transfer(&logs, &expected(100)));
        assert!(contains_transfer(&logs, &expected(60)));
        assert!(!contains_transfer(&logs, &expected(101)));
    }

    #[test]
    fn test_transfer_must_match_token_and_recipient() {
        let other_token = vec![transfer_log(Address::repeat_byte(0x99), RECIPIENT, 100)];
        let other_recipient = vec![transfer_log(TOKEN, Address::repeat_byte(0x44), 100)];

        assert!(!contains_transfer(&other_token, &expected(100)));
        assert!(!contains_transfer(&other_recipient, &expected(100)));
        assert!(!contains_transfer(&[], &expected(100)));
    }

    #[test]
    fn test_unrelated_logs_are_skipped() {
        let deposit = DepositFunds {
            sender: RECIPIENT,
            amount: U256::from(500),
        };
        let logs = vec![
            Log {
                inner: alloy::primitives::Log {
                    address: TOKEN,
                    data: deposit.encode_log_data(),
                },
                ..Default::default()
            },
            transfer_log(TOKEN, RECIPIENT, 100),
        ];

        assert!(contains_transfer(&logs, &expected(100)));
    }
}
