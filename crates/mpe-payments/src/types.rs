//! Core types for the payment system.

use crate::error::PaymentError;
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payment-relevant metadata of a registered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub org_id: String,
    pub service_id: String,
    /// Daemon endpoint, also the RPC endpoint of the service.
    pub url: String,
    /// Price per call in cogs.
    pub price: u64,
    pub group_id: B256,
    /// Recipient of channel funds.
    pub payment_address: Address,
    pub escrow_address: Address,
    /// Blocks a channel must outlive the current block by.
    pub expiration_threshold: u64,
}

impl ServiceDescriptor {
    pub fn price(&self) -> U256 {
        U256::from(self.price)
    }
}

/// A channel as tracked by the engine.
///
/// `nonce` and `signed_amount` come from the provider's ledger; `value`
/// and `expiration` from the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChannel {
    pub channel_id: U256,
    pub nonce: U256,
    pub sender: Address,
    pub signer: Address,
    pub recipient: Address,
    pub group_id: B256,
    pub value: U256,
    pub expiration: u64,
    pub signed_amount: U256,
}

impl PaymentChannel {
    /// Funds not yet promised to the recipient.
    pub fn available(&self) -> U256 {
        self.value.saturating_sub(self.signed_amount)
    }
}

/// Authorization for a single call, attached as call metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAuthorization {
    pub channel_id: U256,
    pub nonce: U256,
    /// Cumulative amount signed within `nonce`.
    pub amount: U256,
    /// 65 bytes, `r ‖ s ‖ v`.
    pub signature: Vec<u8>,
}

/// Lifecycle of a requested payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Correlates a payment with the chat request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentKey {
    pub room_id: String,
    pub sender: String,
    pub command: String,
}

/// EIP-681 token transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUri {
    pub scheme: String,
    pub token: String,
    pub recipient: String,
    pub amount: u64,
}

impl PaymentUri {
    /// The on-chain transfer that settles this request.
    pub fn expected_transfer(&self) -> Result<ExpectedTransfer, PaymentError> {
        let parse = |field: &str, value: &str| {
            value
                .parse::<Address>()
                .map_err(|e| PaymentError::Internal(format!("payment {} {}: {}", field, value, e)))
        };
        Ok(ExpectedTransfer {
            token: parse("token", &self.token)?,
            recipient: parse("recipient", &self.recipient)?,
            amount: U256::from(self.amount),
        })
    }
}

impl fmt::Display for PaymentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/transfer?address={}&uint256={}",
            self.scheme, self.token, self.recipient, self.amount
        )
    }
}

/// ERC-20 transfer a payment transaction must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedTransfer {
    pub token: Address,
    pub recipient: Address,
    /// Minimum value transferred.
    pub amount: U256,
}

/// A payment the bot is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentState {
    pub id: Uuid,
    pub uri: PaymentUri,
    pub key: PaymentKey,
    pub tx_hash: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentState {
    pub fn new(key: PaymentKey, uri: PaymentUri) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            uri,
            key,
            tx_hash: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_uri_format() {
        let uri = PaymentUri {
            scheme: "ethereum".into(),
            token: "0x5B7533812759B45C2B44C19e320ba2cD2681b542".into(),
            recipient: "0x1111111111111111111111111111111111111111".into(),
            amount: 300,
        };

        assert_eq!(
            uri.to_string(),
            "ethereum:0x5B7533812759B45C2B44C19e320ba2cD2681b542/transfer?address=0x1111111111111111111111111111111111111111&uint256=300"
        );
    }

    #[test]
    fn test_expected_transfer() {
        let uri = PaymentUri {
            scheme: "ethereum".into(),
            token: "0x5B7533812759B45C2B44C19e320ba2cD2681b542".into(),
            recipient: "0x1111111111111111111111111111111111111111".into(),
            amount: 300,
        };

        let expected = uri.expected_transfer().unwrap();
        assert_eq!(expected.recipient, Address::repeat_byte(0x11));
        assert_eq!(expected.amount, U256::from(300));

        let broken = PaymentUri {
            recipient: "nobody".into(),
            ..uri
        };
        assert!(broken.expected_transfer().is_err());
    }

    #[test]
    fn test_payment_status_serialization() {
        assert_eq!(serde_json::to_string(&PaymentStatus::Pending).unwrap(), "\"pending\"");
        assert_eq!(PaymentStatus::Expired.to_string(), "expired");
    }

    #[test]
    fn test_channel_available() {
        let channel = PaymentChannel {
            channel_id: U256::from(5),
            nonce: U256::ZERO,
            sender: Address::ZERO,
            signer: Address::ZERO,
            recipient: Address::ZERO,
            group_id: B256::ZERO,
            value: U256::from(100),
            expiration: 1000,
            signed_amount: U256::from(130),
        };

        assert_eq!(channel.available(), U256::ZERO);
    }
}
