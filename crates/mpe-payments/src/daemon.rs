//! Provider daemon payment services.
//!
//! The daemon keeps the authoritative ledger of each channel's nonce and
//! signed amount, and issues prepaid tokens.

use crate::error::PaymentError;
use alloy::primitives::U256;
use async_trait::async_trait;
use grpc_invoke::{grpc_client, is_transport_status, ConnectionManager};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::{Code, Request, Status};
use tracing::{debug, instrument, warn};

const CHANNEL_STATE_PATH: &str = "/escrow.PaymentChannelStateService/GetChannelState";
const GET_TOKEN_PATH: &str = "/escrow.TokenService/GetToken";

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelStateRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub current_block: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelStateReply {
    #[prost(bytes = "vec", tag = "1")]
    pub current_nonce: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub current_signed_amount: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub current_signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub old_nonce_signed_amount: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub old_nonce_signature: Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub planned_amount: u64,
    #[prost(uint64, tag = "7")]
    pub used_amount: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenRequest {
    #[prost(uint64, tag = "1")]
    pub channel_id: u64,
    #[prost(uint64, tag = "2")]
    pub current_nonce: u64,
    #[prost(uint64, tag = "3")]
    pub signed_amount: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub current_block: u64,
    #[prost(bytes = "vec", tag = "6")]
    pub claim_signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenReply {
    #[prost(uint64, tag = "1")]
    pub channel_id: u64,
    #[prost(string, tag = "2")]
    pub token: String,
    #[prost(uint64, tag = "3")]
    pub planned_amount: u64,
    #[prost(uint64, tag = "4")]
    pub used_amount: u64,
}

/// Provider-reported channel ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonChannelState {
    pub nonce: U256,
    pub signed_amount: U256,
}

impl From<&ChannelStateReply> for DaemonChannelState {
    fn from(reply: &ChannelStateReply) -> Self {
        Self {
            nonce: be_to_u256(&reply.current_nonce),
            signed_amount: be_to_u256(&reply.current_signed_amount),
        }
    }
}

/// Empty means zero.
pub fn be_to_u256(bytes: &[u8]) -> U256 {
    if bytes.is_empty() || bytes.len() > 32 {
        return U256::ZERO;
    }
    U256::from_be_slice(bytes)
}

/// Payment RPCs exposed by the provider daemon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn channel_state(
        &self,
        url: &str,
        request: ChannelStateRequest,
    ) -> Result<ChannelStateReply, PaymentError>;

    async fn get_token(&self, url: &str, request: TokenRequest) -> Result<TokenReply, PaymentError>;
}

/// [`DaemonClient`] over pooled gRPC channels.
#[derive(Clone)]
pub struct GrpcDaemonClient {
    connections: ConnectionManager,
}

impl GrpcDaemonClient {
    pub fn new(connections: ConnectionManager) -> Self {
        Self { connections }
    }

    async fn unary<Req, Reply>(
        &self,
        url: &str,
        path: &'static str,
        request: Req,
    ) -> Result<Reply, PaymentError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Reply: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = self
            .connections
            .acquire(url)
            .await
            .map_err(|e| PaymentError::DaemonUnavailable(e.to_string()))?;

        let mut grpc = grpc_client(channel);
        if let Err(e) = grpc.ready().await {
            self.connections.mark_failed(url).await;
            return Err(PaymentError::DaemonUnavailable(format!("{}: {}", url, e)));
        }

        debug!("Calling {} on {}", path, url);
        let codec: ProstCodec<Req, Reply> = ProstCodec::default();
        match grpc
            .unary(Request::new(request), PathAndQuery::from_static(path), codec)
            .await
        {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                if is_transport_status(&status) {
                    self.connections.mark_failed(url).await;
                }
                Err(daemon_error(path, status))
            }
        }
    }
}

#[async_trait]
impl DaemonClient for GrpcDaemonClient {
    #[instrument(skip(self, request))]
    async fn channel_state(
        &self,
        url: &str,
        request: ChannelStateRequest,
    ) -> Result<ChannelStateReply, PaymentError> {
        self.unary(url, CHANNEL_STATE_PATH, request).await
    }

    #[instrument(skip(self, request))]
    async fn get_token(&self, url: &str, request: TokenRequest) -> Result<TokenReply, PaymentError> {
        self.unary(url, GET_TOKEN_PATH, request).await
    }
}

fn daemon_error(path: &str, status: Status) -> PaymentError {
    warn!("{} failed: {:?} {}", path, status.code(), status.message());
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded => {
            PaymentError::DaemonUnavailable(status.message().to_string())
        }
        _ => PaymentError::PaymentRejected(status.message().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_to_u256() {
        assert_eq!(be_to_u256(&[]), U256::ZERO);
        assert_eq!(be_to_u256(&[0x01, 0x2c]), U256::from(300));
        assert_eq!(be_to_u256(&[0u8; 33]), U256::ZERO);
    }

    #[test]
    fn test_daemon_state_from_reply() {
        let reply = ChannelStateReply {
            current_nonce: vec![2],
            current_signed_amount: vec![0x01, 0x00],
            ..Default::default()
        };

        let state = DaemonChannelState::from(&reply);
        assert_eq!(state.nonce, U256::from(2));
        assert_eq!(state.signed_amount, U256::from(256));
    }

    #[test]
    fn test_daemon_error_mapping() {
        assert!(matches!(
            daemon_error(GET_TOKEN_PATH, Status::unavailable("down")),
            PaymentError::DaemonUnavailable(_)
        ));
        assert!(matches!(
            daemon_error(GET_TOKEN_PATH, Status::failed_precondition("bad nonce")),
            PaymentError::PaymentRejected(msg) if msg == "bad nonce"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let client = GrpcDaemonClient::new(ConnectionManager::new(
            std::time::Duration::from_millis(200),
            std::time::Duration::from_secs(1),
        ));

        let err = client
            .channel_state("http://127.0.0.1:1", ChannelStateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DaemonUnavailable(_)));
    }
}
