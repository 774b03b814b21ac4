//! Keyed pool of gRPC channels to service endpoints.

use crate::error::InvokeError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::client::Grpc;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info, instrument, warn};

/// Send and receive limit applied to every call.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Connectivity as last observed by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Failed,
}

struct PoolEntry {
    channel: Channel,
    state: ConnectionState,
}

/// Pool of persistent channels keyed by endpoint URL.
///
/// Entries are reused while `Ready`. Callers that observe a transport
/// failure report it with [`ConnectionManager::mark_failed`], and the next
/// [`ConnectionManager::acquire`] for that URL dials a fresh channel.
#[derive(Clone)]
pub struct ConnectionManager {
    entries: Arc<Mutex<HashMap<String, PoolEntry>>>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            connect_timeout,
            call_timeout,
        }
    }

    /// Return a ready channel for `url`, dialing one if needed.
    #[instrument(skip(self))]
    pub async fn acquire(&self, url: &str) -> Result<Channel, InvokeError> {
        {
            let mut entries = self.entries.lock().await;
            match entries.get(url) {
                Some(entry) if entry.state == ConnectionState::Ready => {
                    return Ok(entry.channel.clone());
                }
                Some(_) => {
                    debug!("Discarding failed connection to {}", url);
                    entries.remove(url);
                }
                None => {}
            }
        }

        // Dial without holding the pool lock
        let channel = self.dial(url).await?;

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(url.to_string()).or_insert_with(|| PoolEntry {
            channel: channel.clone(),
            state: ConnectionState::Ready,
        });
        if entry.state != ConnectionState::Ready {
            entry.channel = channel;
            entry.state = ConnectionState::Ready;
        }

        Ok(entry.channel.clone())
    }

    /// Flip the entry for `url` out of `Ready`.
    pub async fn mark_failed(&self, url: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(url) {
            warn!("Marking connection to {} as failed", url);
            entry.state = ConnectionState::Failed;
        }
    }

    pub async fn state(&self, url: &str) -> Option<ConnectionState> {
        self.entries.lock().await.get(url).map(|entry| entry.state)
    }

    /// Number of pooled entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn dial(&self, url: &str) -> Result<Channel, InvokeError> {
        let mut endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| InvokeError::connect(url, e))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.call_timeout);

        if url.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new())
                .map_err(|e| InvokeError::connect(url, e))?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| InvokeError::connect(url, e))?;

        info!("Connected to {}", url);
        Ok(channel)
    }
}

/// Wrap a channel in a generic client with the pool's message limits.
pub fn grpc_client(channel: Channel) -> Grpc<Channel> {
    Grpc::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE)
}
