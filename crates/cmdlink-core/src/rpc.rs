//! Request and reply payloads of the remote command protocol.
//!
//! Every reply carries a `success` flag and an optional error message; a
//! reply with `success == false` is an application-level rejection, not a
//! transport failure.

use serde::{Deserialize, Serialize};

use crate::StatusSnapshot;

/// Connect handshake request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Connect handshake reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectReply {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub version: String,
}

/// Authenticated user details returned on login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
}

/// Login reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginReply {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Generic success/failure acknowledgement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Ack {
    /// Successful acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// Rejection with a reason.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(reason.into()),
        }
    }
}

/// Keep-alive reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepAliveReply {
    pub session_valid: bool,
    #[serde(default)]
    pub remaining_minutes: Option<u32>,
}

/// Unary or streaming command request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub session_token: String,
    pub command_line: String,
    #[serde(default)]
    pub last_context: String,
}

/// Unary command reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub output: String,
    /// Service context the server switched to, if any.
    #[serde(default)]
    pub new_context: Option<String>,
    #[serde(default)]
    pub status: Option<StatusSnapshot>,
}

/// Discriminator of a streamed output event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    StatusUpdate,
    Error,
    Completion,
}

/// One event of a streaming command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub kind: OutputKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub progress_percent: Option<u8>,
}

impl OutputEvent {
    /// Plain text event.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Text, content)
    }

    /// Event of the given kind without progress.
    #[must_use]
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            progress_percent: None,
        }
    }
}

/// Auto-complete request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub session_token: String,
    pub partial_input: String,
    #[serde(default)]
    pub current_context: String,
    pub cursor_position: usize,
}

/// Auto-complete reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReply {
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub common_prefix: String,
}

/// A business service exposed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A command of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub syntax: String,
}

/// Help text for a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpReply {
    pub help_text: String,
    #[serde(default)]
    pub command: Option<CommandInfo>,
}

/// A server-side alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub alias: String,
    pub expanded_command: String,
}
