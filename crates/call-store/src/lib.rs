//! In-memory storage for in-progress paid calls.
//!
//! A session tracks one user's call in one room from the payment request
//! through the last collected input. Sessions expire after a TTL and are
//! never persisted.

mod error;
mod store;
mod types;

pub use error::CallStoreError;
pub use store::CallStore;
pub use types::*;
