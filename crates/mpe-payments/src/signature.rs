//! Message layouts and Ethereum-style signing.
//!
//! Every message is hashed as
//! `keccak256("\x19Ethereum Signed Message:\n32" ‖ keccak256(message))`
//! and signed with secp256k1, encoded `r ‖ s ‖ v` with `v` in {27, 28}.

use crate::error::PaymentError;
use alloy::primitives::{keccak256, Address, Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

pub const CLAIM_PREFIX: &[u8] = b"__MPE_claim_message";
pub const CHANNEL_STATE_PREFIX: &[u8] = b"__get_channel_state";
const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// `"__MPE_claim_message" ‖ escrow ‖ be256(channel_id) ‖ be256(nonce) ‖ be256(amount)`
pub fn claim_message(escrow: Address, channel_id: U256, nonce: U256, amount: U256) -> Vec<u8> {
    let mut message = Vec::with_capacity(CLAIM_PREFIX.len() + 20 + 96);
    message.extend_from_slice(CLAIM_PREFIX);
    message.extend_from_slice(escrow.as_slice());
    message.extend_from_slice(&channel_id.to_be_bytes::<32>());
    message.extend_from_slice(&nonce.to_be_bytes::<32>());
    message.extend_from_slice(&amount.to_be_bytes::<32>());
    message
}

/// `"__get_channel_state" ‖ escrow ‖ be256(channel_id) ‖ be256(block)`
pub fn channel_state_message(escrow: Address, channel_id: U256, block: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(CHANNEL_STATE_PREFIX.len() + 20 + 64);
    message.extend_from_slice(CHANNEL_STATE_PREFIX);
    message.extend_from_slice(escrow.as_slice());
    message.extend_from_slice(&channel_id.to_be_bytes::<32>());
    message.extend_from_slice(&U256::from(block).to_be_bytes::<32>());
    message
}

/// `claim_signature ‖ be256(block)`
pub fn token_message(claim_signature: &[u8], block: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(claim_signature.len() + 32);
    message.extend_from_slice(claim_signature);
    message.extend_from_slice(&U256::from(block).to_be_bytes::<32>());
    message
}

/// Prefixed double hash that is actually signed.
pub fn eth_message_hash(message: &[u8]) -> B256 {
    let inner = keccak256(message);
    let mut prefixed = Vec::with_capacity(ETH_MESSAGE_PREFIX.len() + 32);
    prefixed.extend_from_slice(ETH_MESSAGE_PREFIX);
    prefixed.extend_from_slice(inner.as_slice());
    keccak256(prefixed)
}

/// Signing key of the channel sender.
#[derive(Clone)]
pub struct PaymentSigner {
    inner: PrivateKeySigner,
}

impl PaymentSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, PaymentError> {
        let inner: PrivateKeySigner = key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| PaymentError::InvalidKey(format!("{}", e)))?;
        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Underlying signer, for building a transaction wallet.
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.inner
    }

    /// Sign `message` and return the 65-byte `r ‖ s ‖ v` encoding.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, PaymentError> {
        let signature = self
            .inner
            .sign_hash_sync(&eth_message_hash(message))
            .map_err(|e| PaymentError::Signature(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for PaymentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSigner")
            .field("address", &self.address())
            .finish()
    }
}

/// Address that produced `signature` over `message`.
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<Address, PaymentError> {
    let signature =
        Signature::try_from(signature).map_err(|e| PaymentError::Signature(e.to_string()))?;
    signature
        .recover_address_from_prehash(&eth_message_hash(message))
        .map_err(|e| PaymentError::Signature(e.to_string()))
}
