//! Invocation errors, one variant per stage of a call.

use thiserror::Error;
use tonic::Code;

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Resolve failed: {0}")]
    Resolve(String),

    #[error("Request decode failed: {0}")]
    Decode(String),

    #[error("Connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Invoke failed: {0}")]
    Invoke(#[from] tonic::Status),

    #[error("Response encode failed: {0}")]
    Encode(String),
}

impl InvokeError {
    pub fn connect(url: &str, reason: impl ToString) -> Self {
        Self::Connect {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Decode(_) => "decode",
            Self::Connect { .. } => "connect",
            Self::Invoke(_) => "invoke",
            Self::Encode(_) => "encode",
        }
    }

    /// True when the failure came from the transport rather than the service.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Invoke(status) => is_transport_status(status),
            _ => false,
        }
    }
}

/// Status codes that indicate the underlying connection is unusable.
pub fn is_transport_status(status: &tonic::Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
}
