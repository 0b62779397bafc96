use thiserror::Error;

pub const HISTORY_OPERATION: &str = "conversation-history";
pub const SEND_OPERATION: &str = "send-message";

/// Failure of one round trip against the assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },
    #[error("{operation} returned a malformed response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },
}

impl SyncError {
    pub fn transport(operation: &'static str, source: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: source.to_string(),
        }
    }

    pub fn malformed(operation: &'static str, source: impl std::fmt::Display) -> Self {
        Self::MalformedResponse {
            operation,
            message: source.to_string(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            SyncError::Transport { operation, .. }
            | SyncError::Status { operation, .. }
            | SyncError::MalformedResponse { operation, .. } => operation,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, SyncError::MalformedResponse { .. })
    }
}
