//! Message receiver over the long-poll sync loop.

use crate::client::MatrixClient;
use crate::types::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::Stream;
use tracing::{debug, error, info};

/// Rooms with at most this many joined members are treated as private.
pub const DIRECT_ROOM_MAX_MEMBERS: u64 = 2;

/// Yields text messages addressed to rooms the bot has joined.
pub struct MessageReceiver {
    client: MatrixClient,
    sync_timeout: Duration,
}

impl MessageReceiver {
    pub fn new(client: MatrixClient, sync_timeout: Duration) -> Self {
        Self {
            client,
            sync_timeout,
        }
    }

    /// Start receiving messages as an async stream.
    ///
    /// The first sync only establishes the position in the timeline, so
    /// history from before startup is never replayed.
    pub fn stream(self) -> impl Stream<Item = BotMessage> {
        async_stream::stream! {
            let mut since: Option<String> = None;
            let mut member_counts: HashMap<String, u64> = HashMap::new();

            loop {
                let response = match self.client.sync(since.as_deref(), self.sync_timeout).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("Sync error: {}", e);
                        // Back off on error
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let initial = since.is_none();
                since = Some(response.next_batch.clone());

                let rooms = response.rooms.unwrap_or_default();
                let messages = collect_messages(
                    rooms,
                    &mut member_counts,
                    self.client.user_id(),
                );

                if initial {
                    info!("Initial sync complete, skipping {} historical messages", messages.len());
                    continue;
                }

                for message in messages {
                    debug!(
                        "Received: {} from {}",
                        message.body.chars().take(50).collect::<String>(),
                        message.sender
                    );
                    yield message;
                }
            }
        }
    }
}

/// Extract bot messages from one sync batch, updating member counts.
pub fn collect_messages(
    rooms: Rooms,
    member_counts: &mut HashMap<String, u64>,
    own_user_id: &str,
) -> Vec<BotMessage> {
    let mut messages = Vec::new();

    for (room_id, room) in rooms.join {
        if let Some(count) = room.summary.and_then(|s| s.joined_member_count) {
            member_counts.insert(room_id.clone(), count);
        }

        let is_direct = member_counts
            .get(&room_id)
            .map_or(false, |count| *count <= DIRECT_ROOM_MAX_MEMBERS);

        let events = room.timeline.map(|t| t.events).unwrap_or_default();
        messages.extend(
            events
                .iter()
                .filter(|event| event.sender != own_user_id)
                .filter_map(|event| BotMessage::from_event(&room_id, event, is_direct)),
        );
    }

    messages
}
