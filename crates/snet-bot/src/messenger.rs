//! Outbound chat messages.

use async_trait::async_trait;
use matrix_client::{BotMessage, MatrixClient, MatrixError};

/// Sends text into rooms and returns the new event's id.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, room_id: &str, body: &str) -> Result<String, MatrixError>;

    async fn reply(&self, original: &BotMessage, body: &str) -> Result<String, MatrixError>;
}

#[async_trait]
impl Messenger for MatrixClient {
    async fn send(&self, room_id: &str, body: &str) -> Result<String, MatrixError> {
        self.send_text(room_id, body).await
    }

    async fn reply(&self, original: &BotMessage, body: &str) -> Result<String, MatrixError> {
        MatrixClient::reply(self, original, body).await
    }
}
