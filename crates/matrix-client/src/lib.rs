//! Matrix client-server API client.

mod client;
mod error;
mod receiver;
mod types;

pub use client::MatrixClient;
pub use error::MatrixError;
pub use receiver::{collect_messages, MessageReceiver, DIRECT_ROOM_MAX_MEMBERS};
pub use types::*;
