//! In-memory collaborators and a small calculator schema.

#![allow(dead_code)]

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use grpc_invoke::DescriptorPool;
use matrix_client::{BotMessage, MatrixError};
use mpe_payments::{PaymentError, PaymentUri, ServiceDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use snet_bot::orchestrator::{AiRequest, Dispatcher, HealthProbe, PaymentConfirmer};
use snet_bot::{CatalogEntry, Messenger, ServiceCatalog};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub const ROOM: &str = "!room:example.org";
pub const SENDER: &str = "@alice:example.org";
pub const TX_HASH: &str = "0x8f2a2c5e6d7b1a9f3c4e5d6a7b8c9d0e1f2a3b4c5d6e7f8091a2b3c4d5e6f708";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub room_id: String,
    pub body: String,
    pub reply_to: Option<String>,
    pub event_id: String,
}

/// Records every outbound message; event ids are `$bot1`, `$bot2`, ...
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.body).collect()
    }

    pub fn last(&self) -> Option<Sent> {
        self.sent().last().cloned()
    }

    fn record(&self, room_id: &str, body: &str, reply_to: Option<String>) -> String {
        let mut sent = self.sent.lock().unwrap();
        let event_id = format!("$bot{}", sent.len() + 1);
        sent.push(Sent {
            room_id: room_id.to_string(),
            body: body.to_string(),
            reply_to,
            event_id: event_id.clone(),
        });
        event_id
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, room_id: &str, body: &str) -> Result<String, MatrixError> {
        Ok(self.record(room_id, body, None))
    }

    async fn reply(&self, original: &BotMessage, body: &str) -> Result<String, MatrixError> {
        Ok(self.record(&original.room_id, body, Some(original.event_id.clone())))
    }
}

pub struct FixedHealth(pub bool);

#[async_trait]
impl HealthProbe for FixedHealth {
    async fn is_serving(&self, _url: &str) -> bool {
        self.0
    }
}

/// Reports the same transfer status for every transaction.
pub struct FixedConfirmer(pub Option<bool>);

#[async_trait]
impl PaymentConfirmer for FixedConfirmer {
    async fn transfer_status(
        &self,
        _tx_hash: &str,
        _uri: &PaymentUri,
    ) -> Result<Option<bool>, PaymentError> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<AiRequest>>,
}

impl RecordingDispatcher {
    pub fn requests(&self) -> Vec<AiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: AiRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

#[derive(Default)]
pub struct StaticCatalog {
    entries: HashMap<(String, String), CatalogEntry>,
}

impl StaticCatalog {
    pub fn with(mut self, snet_id: &str, descriptor: &str, entry: CatalogEntry) -> Self {
        self.entries
            .insert((snet_id.to_string(), descriptor.to_string()), entry);
        self
    }
}

impl ServiceCatalog for StaticCatalog {
    fn lookup(&self, snet_id: &str, descriptor: &str) -> Option<CatalogEntry> {
        self.entries
            .get(&(snet_id.to_string(), descriptor.to_string()))
            .cloned()
    }
}

pub fn calculator_entry() -> CatalogEntry {
    CatalogEntry {
        service: ServiceDescriptor {
            org_id: "org1".into(),
            service_id: "calculator".into(),
            url: "http://calc.example.org:7000".into(),
            price: 100,
            group_id: B256::repeat_byte(7),
            payment_address: Address::repeat_byte(0x11),
            escrow_address: Address::repeat_byte(0x22),
            expiration_threshold: 100,
        },
        schema: calculator_pool(),
    }
}

pub fn message(body: &str) -> BotMessage {
    BotMessage {
        room_id: ROOM.into(),
        event_id: format!("$user-{}", Uuid::new_v4()),
        sender: SENDER.into(),
        body: body.into(),
        in_reply_to: None,
        is_direct: false,
        timestamp: Utc::now(),
    }
}

pub fn reply_to(parent: &str, body: &str) -> BotMessage {
    BotMessage {
        in_reply_to: Some(parent.into()),
        ..message(body)
    }
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        json_name: Some(name.into()),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(format!(".example.{}", input)),
        output_type: Some(format!(".example.{}", output)),
        ..Default::default()
    }
}

/// `example.calc` with `add(AddRequest)` and the input-less `ping(Empty)`.
pub fn calculator_descriptor_set() -> FileDescriptorSet {
    let file = FileDescriptorProto {
        name: Some("calc.proto".into()),
        package: Some("example".into()),
        syntax: Some("proto3".into()),
        message_type: vec![
            DescriptorProto {
                name: Some("AddRequest".into()),
                field: vec![field("amount", 1, Type::Float), field("note", 2, Type::String)],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("AddReply".into()),
                field: vec![field("value", 1, Type::Float)],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Empty".into()),
                ..Default::default()
            },
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("calc".into()),
            method: vec![
                method("add", "AddRequest", "AddReply"),
                method("ping", "Empty", "Empty"),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    FileDescriptorSet { file: vec![file] }
}

pub fn calculator_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(calculator_descriptor_set()).unwrap()
}

/// `grpc.health.v1`, as served by `tonic-health`.
pub fn health_pool() -> DescriptorPool {
    DescriptorPool::decode(tonic_health::pb::FILE_DESCRIPTOR_SET).unwrap()
}
