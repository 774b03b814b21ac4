//! HTTP API for payment states.

mod handlers;
mod types;

pub use handlers::{create_router, ApiState};
pub use types::*;
