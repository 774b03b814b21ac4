//! Matrix HTTP client.

use crate::error::MatrixError;
use crate::types::*;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Matrix client-server API client authenticated as the bot user.
#[derive(Clone)]
pub struct MatrixClient {
    client: Client,
    base_url: String,
    access_token: Arc<SecretString>,
    user_id: String,
    txn_counter: Arc<AtomicU64>,
}

impl MatrixClient {
    /// Create a new client for `homeserver_url`.
    pub fn new(
        homeserver_url: impl Into<String>,
        access_token: SecretString,
        user_id: impl Into<String>,
    ) -> Result<Self, MatrixError> {
        // Long-poll syncs outlive the default request timeout
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: homeserver_url.into().trim_end_matches('/').to_string(),
            access_token: Arc::new(access_token),
            user_id: user_id.into(),
            txn_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The bot's own user ID.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.access_token.expose_secret())
    }

    /// Check if the homeserver is reachable.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/_matrix/client/versions", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Resolve the user the access token belongs to.
    #[instrument(skip(self))]
    pub async fn whoami(&self) -> Result<WhoAmI, MatrixError> {
        let response = self
            .authed(
                self.client
                    .get(format!("{}/_matrix/client/v3/account/whoami", self.base_url)),
            )
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// Long-poll for events after `since`.
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, MatrixError> {
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .authed(
                self.client
                    .get(format!("{}/_matrix/client/v3/sync", self.base_url))
                    .query(&query),
            )
            .send()
            .await?;

        let sync: SyncResponse = check(response).await?.json().await?;
        debug!("Synced to {}", sync.next_batch);
        Ok(sync)
    }

    /// Send a plain text message, returning its event ID.
    #[instrument(skip(self, body))]
    pub async fn send_text(&self, room_id: &str, body: &str) -> Result<String, MatrixError> {
        self.send_message(room_id, &SendMessageRequest::text(body)).await
    }

    /// Reply to `original` in its room, threading via `m.in_reply_to`.
    pub async fn reply(&self, original: &BotMessage, body: &str) -> Result<String, MatrixError> {
        let request = SendMessageRequest::reply(body, &original.event_id);
        self.send_message(&original.room_id, &request).await
    }

    async fn send_message(
        &self,
        room_id: &str,
        request: &SendMessageRequest,
    ) -> Result<String, MatrixError> {
        let url = format!(
            "{}/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
            self.base_url,
            encode(room_id),
            self.next_txn_id()
        );

        let response = self
            .authed(self.client.put(url).json(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let msg = response.text().await.unwrap_or_default();
            warn!("Send failed: {}", msg);
            return Err(MatrixError::SendFailed(msg));
        }

        let sent: SendMessageResponse = response.json().await?;
        debug!("Sent {} to {}", sent.event_id, room_id);
        Ok(sent.event_id)
    }

    fn next_txn_id(&self) -> String {
        let counter = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("snet{}.{}", chrono::Utc::now().timestamp_millis(), counter)
    }
}

async fn check(response: Response) -> Result<Response, MatrixError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(MatrixError::Api {
        status: status.as_u16(),
        message,
    })
}
