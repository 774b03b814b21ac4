//! Payment configuration.

use crate::engine::{EngineConfig, STATE_FETCH_ATTEMPTS, STATE_FETCH_BACKOFF};
use crate::error::PaymentError;
use crate::strategy::StrategyKind;
use alloy::primitives::{Address, U256};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main payment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Ethereum JSON-RPC endpoint.
    pub rpc_url: String,

    /// Hex private key of the paying account.
    pub private_key: SecretString,

    #[serde(default = "default_escrow_address")]
    pub escrow_address: String,

    /// ERC-20 token the escrow holds.
    #[serde(default = "default_token_address")]
    pub token_address: String,

    #[serde(default)]
    pub strategy: StrategyKind,

    /// Calls bought with one prepaid token.
    #[serde(default = "default_prepaid_calls")]
    pub prepaid_calls: u64,

    /// How long a user has to pay.
    #[serde(default = "default_payment_timeout", with = "humantime_serde")]
    pub payment_timeout: Duration,

    /// Interval between payment state checks.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Bound on waiting for a contract event after a transaction.
    #[serde(default = "default_event_timeout", with = "humantime_serde")]
    pub event_timeout: Duration,

    #[serde(default = "default_expiration_buffer")]
    pub expiration_buffer_blocks: u64,

    /// Allowance granted after an allowance revert, in cogs.
    #[serde(default = "default_approve_amount")]
    pub approve_amount: u64,

    /// Scheme of the payment URI sent to users.
    #[serde(default = "default_uri_scheme")]
    pub uri_scheme: String,

    /// Host of the payment page linked next to the URI.
    #[serde(default = "default_gateway_domain")]
    pub gateway_domain: String,

    /// JSON file for payment states; in memory when unset.
    pub storage_path: Option<PathBuf>,

    /// HTTP server port for the admin API.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,

    /// How long paid or expired payment states are kept.
    #[serde(default = "default_state_retention", with = "humantime_serde")]
    pub state_retention: Duration,

    /// First block scanned for `ChannelOpen` logs.
    #[serde(default)]
    pub channel_scan_from_block: u64,
}

fn default_escrow_address() -> String {
    "0x5e592F9b1d303183d963635f895f0f0C48284f4e".to_string()
}

fn default_token_address() -> String {
    "0x5B7533812759B45C2B44C19e320ba2cD2681b542".to_string()
}

fn default_prepaid_calls() -> u64 {
    10
}

fn default_payment_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_event_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_expiration_buffer() -> u64 {
    240
}

fn default_approve_amount() -> u64 {
    1_000_000_000_000_000_000
}

fn default_uri_scheme() -> String {
    "ethereum".to_string()
}

fn default_gateway_domain() -> String {
    "localhost:8082".to_string()
}

fn default_server_port() -> u16 {
    8082
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_state_retention() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

impl PaymentConfig {
    pub fn escrow(&self) -> Result<Address, PaymentError> {
        parse_address("escrow_address", &self.escrow_address)
    }

    pub fn token(&self) -> Result<Address, PaymentError> {
        parse_address("token_address", &self.token_address)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            expiration_buffer_blocks: self.expiration_buffer_blocks,
            approve_amount: U256::from(self.approve_amount),
            state_fetch_attempts: STATE_FETCH_ATTEMPTS,
            state_fetch_backoff: STATE_FETCH_BACKOFF,
        }
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, PaymentError> {
    value
        .trim()
        .parse()
        .map_err(|e| PaymentError::Config(format!("{} {:?}: {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PaymentConfig {
        serde_json::from_value(serde_json::json!({
            "rpc_url": "http://localhost:8545",
            "private_key": "0xabc"
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal();

        assert_eq!(config.strategy, StrategyKind::Escrow);
        assert_eq!(config.payment_timeout, Duration::from_secs(600));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.event_timeout, Duration::from_secs(60));
        assert_eq!(config.server_port, 8082);
        assert_eq!(config.state_retention, Duration::from_secs(7 * 24 * 60 * 60));
        assert!(config.storage_path.is_none());
        assert!(config.escrow().is_ok());
        assert!(config.token().is_ok());
    }

    #[test]
    fn test_humantime_durations() {
        let config: PaymentConfig = serde_json::from_value(serde_json::json!({
            "rpc_url": "http://localhost:8545",
            "private_key": "0xabc",
            "strategy": "prepaid",
            "payment_timeout": "2m",
            "token_ttl": "30s",
            "state_retention": "1day"
        }))
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::Prepaid);
        assert_eq!(config.payment_timeout, Duration::from_secs(120));
        assert_eq!(config.token_ttl, Duration::from_secs(30));
        assert_eq!(config.state_retention, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_invalid_address() {
        let mut config = minimal();
        config.escrow_address = "not-an-address".into();

        assert!(matches!(config.escrow(), Err(PaymentError::Config(_))));
    }
}
