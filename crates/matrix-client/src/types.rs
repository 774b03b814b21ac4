//! Matrix client-server API types.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Response of `GET /_matrix/client/v3/sync`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Option<Rooms>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub summary: Option<RoomSummary>,
    #[serde(default)]
    pub timeline: Option<Timeline>,
}

/// Counts are only present when they changed since the last sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "m.joined_member_count")]
    pub joined_member_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomEvent {
    pub event_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub origin_server_ts: i64,
}

/// Body of `PUT /rooms/{roomId}/send/m.room.message/{txnId}`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub msgtype: String,
    pub body: String,
    #[serde(rename = "m.relates_to", skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<RelatesTo>,
}

impl SendMessageRequest {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".into(),
            body: body.into(),
            relates_to: None,
        }
    }

    pub fn reply(body: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            relates_to: Some(RelatesTo {
                in_reply_to: InReplyTo {
                    event_id: event_id.into(),
                },
            }),
            ..Self::text(body)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatesTo {
    #[serde(rename = "m.in_reply_to")]
    pub in_reply_to: InReplyTo,
}

#[derive(Debug, Clone, Serialize)]
pub struct InReplyTo {
    pub event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    pub event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmI {
    pub user_id: String,
}

/// Parsed text message for bot processing.
#[derive(Debug, Clone)]
pub struct BotMessage {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub body: String,
    /// Parent event when this message is a reply.
    pub in_reply_to: Option<String>,
    /// True in rooms with at most two joined members.
    pub is_direct: bool,
    pub timestamp: DateTime<Utc>,
}

impl BotMessage {
    /// Convert a timeline event, keeping only `m.text` room messages.
    pub fn from_event(room_id: &str, event: &RoomEvent, is_direct: bool) -> Option<Self> {
        if event.event_type != "m.room.message" {
            return None;
        }
        if event.content.get("msgtype").and_then(Value::as_str) != Some("m.text") {
            return None;
        }

        let body = event.content.get("body")?.as_str()?.to_string();
        let in_reply_to = event
            .content
            .pointer("/m.relates_to/m.in_reply_to/event_id")
            .and_then(Value::as_str)
            .map(String::from);

        Some(Self {
            room_id: room_id.to_string(),
            event_id: event.event_id.clone(),
            sender: event.sender.clone(),
            body,
            in_reply_to,
            is_direct,
            timestamp: Utc
                .timestamp_millis_opt(event.origin_server_ts)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    /// Body with any quoted reply fallback removed.
    pub fn text(&self) -> &str {
        strip_reply_fallback(&self.body)
    }
}

/// Drop the leading `> ` quote block a client prepends to reply bodies.
pub fn strip_reply_fallback(body: &str) -> &str {
    if !body.starts_with("> ") {
        return body.trim();
    }

    let mut rest = body;
    while rest.starts_with('>') {
        match rest.find('\n') {
            Some(newline) => rest = &rest[newline + 1..],
            None => return "",
        }
    }

    rest.trim()
}
