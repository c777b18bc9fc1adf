//! Wire protocol for client-server communication.
//!
//! One JSON object per line in each direction. Requests carry a
//! client-chosen id; every server frame echoes the id it answers.

use cmdlink_core::rpc::{CommandRequest, CompletionRequest, ConnectRequest, OutputEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request identifier, unique per channel.
pub type RequestId = u64;

/// Frame sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: RequestId,
    pub call: Call,
}

impl RequestFrame {
    /// Encode as a single line, without the trailing newline.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Remote operation and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    Connect(ConnectRequest),
    Login {
        username: String,
        password: String,
    },
    Logout {
        session_token: String,
    },
    KeepAlive {
        session_token: String,
    },
    Execute(CommandRequest),
    ExecuteStreaming(CommandRequest),
    ListServices {
        session_token: String,
    },
    ListCommands {
        session_token: String,
        service: String,
    },
    CommandHelp {
        session_token: String,
        service: String,
        action: String,
        subaction: String,
    },
    AutoComplete(CompletionRequest),
    ListAliases {
        session_token: String,
    },
    CreateAlias {
        session_token: String,
        alias: String,
        expanded_command: String,
    },
    DeleteAlias {
        session_token: String,
        alias: String,
    },
}

impl Call {
    /// Method name as it appears on the wire.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::KeepAlive { .. } => "keep_alive",
            Self::Execute(_) => "execute",
            Self::ExecuteStreaming(_) => "execute_streaming",
            Self::ListServices { .. } => "list_services",
            Self::ListCommands { .. } => "list_commands",
            Self::CommandHelp { .. } => "command_help",
            Self::AutoComplete(_) => "auto_complete",
            Self::ListAliases { .. } => "list_aliases",
            Self::CreateAlias { .. } => "create_alias",
            Self::DeleteAlias { .. } => "delete_alias",
        }
    }
}

/// Frame sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Result of a unary call.
    Reply { id: RequestId, result: Value },
    /// One event of a streaming call.
    Output { id: RequestId, event: OutputEvent },
    /// A streaming call finished normally.
    StreamEnd { id: RequestId },
    /// The server could not process the request.
    Failure { id: RequestId, message: String },
}

impl ServerFrame {
    /// Id of the request this frame answers.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Reply { id, .. }
            | Self::Output { id, .. }
            | Self::StreamEnd { id }
            | Self::Failure { id, .. } => *id,
        }
    }

    /// Parse one line.
    ///
    /// # Errors
    /// Returns error if the line is not a valid frame.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
