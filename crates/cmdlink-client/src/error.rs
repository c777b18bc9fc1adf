//! Client error types.

use cmdlink_core::RpcError;
use thiserror::Error;

/// Error returned by session operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to a server")]
    NotConnected,
    #[error("Not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    Transport(#[from] RpcError),
    #[error("{operation} failed: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Discovery error: {0}")]
    Discovery(String),
    #[error("No servers found")]
    NoServers,
    #[error("No server selected")]
    NoSelection,
}

impl ClientError {
    /// Rejection with the server's message, or a generic reason when absent.
    pub(crate) fn rejected(operation: &'static str, message: Option<String>) -> Self {
        Self::Rejected {
            operation,
            reason: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    }

    /// Whether this is a transport failure rather than a rejection or precondition.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the channel reported that the server is gone.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(RpcError::Closed))
    }
}
