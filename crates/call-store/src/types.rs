//! Call session types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifies one user's conversation in one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub room_id: String,
    pub sender: String,
}

impl SessionKey {
    pub fn new(room_id: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.sender, self.room_id)
    }
}

/// The service method a session is working towards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub snet_id: String,
    pub descriptor: String,
    pub service: String,
    pub method: String,
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}.{}",
            self.snet_id, self.descriptor, self.service, self.method
        )
    }
}

/// An input the user will be prompted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    pub kind: String,
}

impl InputField {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingPayment,
    CollectingInputs,
}

/// Progress of one paid call through payment and input collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallState {
    pub target: CallTarget,
    pub fields: Vec<InputField>,
    pub next_field: usize,
    pub last_event_id: Option<String>,
    pub values: BTreeMap<String, String>,
    pub payment_id: Uuid,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallState {
    pub fn new(target: CallTarget, fields: Vec<InputField>, payment_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            target,
            fields,
            next_field: 0,
            last_event_id: None,
            values: BTreeMap::new(),
            payment_id,
            stage: Stage::AwaitingPayment,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payment is settled; replies are now accepted as inputs.
    pub fn begin_collecting(&mut self) {
        self.stage = Stage::CollectingInputs;
        self.updated_at = Utc::now();
    }

    pub fn current_field(&self) -> Option<&InputField> {
        self.fields.get(self.next_field)
    }

    /// Remember the prompt a reply must thread to.
    pub fn set_prompt(&mut self, event_id: impl Into<String>) {
        self.last_event_id = Some(event_id.into());
        self.updated_at = Utc::now();
    }

    /// A reply is only an input when it answers the latest prompt.
    pub fn accepts_reply_to(&self, parent_event_id: &str) -> bool {
        self.stage == Stage::CollectingInputs
            && self.last_event_id.as_deref() == Some(parent_event_id)
    }

    /// Store `value` under the current field and advance.
    ///
    /// Returns `false` when every field is already filled.
    pub fn record_input(&mut self, value: impl Into<String>) -> bool {
        let Some(field) = self.current_field() else {
            return false;
        };
        let name = field.name.clone();
        self.values.insert(name, value.into());
        self.next_field += 1;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.next_field >= self.fields.len()
    }
}
