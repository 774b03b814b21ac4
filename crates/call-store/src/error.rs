//! Call session storage errors.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallStoreError {
    #[error("No active session for {0}")]
    NotFound(String),
}
