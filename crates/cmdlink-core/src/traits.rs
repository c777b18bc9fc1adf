//! Remote command protocol traits.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::rpc::{
    Ack, AliasInfo, CommandInfo, CommandReply, CommandRequest, CompletionReply,
    CompletionRequest, ConnectReply, ConnectRequest, HelpReply, KeepAliveReply, LoginReply,
    OutputEvent, ServiceInfo,
};

/// Transport-level RPC error.
///
/// Application rejections are not errors at this layer; they arrive as
/// replies with `success == false`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed")]
    Closed,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Stream of output events from a streaming command.
///
/// Ends when the server closes the stream; an `Err` item is a mid-stream
/// transport failure.
pub type OutputStream = BoxStream<'static, Result<OutputEvent, RpcError>>;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub use_tls: bool,
}

impl Endpoint {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            address: address.into(),
            port,
            use_tls,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The remote command server as seen by the client.
///
/// Each method is one RPC. Implementations do not apply timeouts; callers
/// bound every call and may drop the future to cancel it.
#[async_trait]
pub trait CommandService: Send + Sync {
    /// Connect handshake.
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, RpcError>;

    /// Authenticate with username and password.
    async fn login(&self, username: &str, password: &str) -> Result<LoginReply, RpcError>;

    /// End the session identified by `session_token`.
    async fn logout(&self, session_token: &str) -> Result<Ack, RpcError>;

    /// Renew the session.
    async fn keep_alive(&self, session_token: &str) -> Result<KeepAliveReply, RpcError>;

    /// Execute a command and wait for its full result.
    async fn execute(&self, request: CommandRequest) -> Result<CommandReply, RpcError>;

    /// Execute a command whose output arrives as a stream.
    async fn execute_streaming(&self, request: CommandRequest) -> Result<OutputStream, RpcError>;

    /// List the services available to the session.
    async fn list_services(&self, session_token: &str) -> Result<Vec<ServiceInfo>, RpcError>;

    /// List the commands of one service.
    async fn list_commands(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<Vec<CommandInfo>, RpcError>;

    /// Fetch help for `service.action.subaction`.
    async fn command_help(
        &self,
        session_token: &str,
        service: &str,
        action: &str,
        subaction: &str,
    ) -> Result<HelpReply, RpcError>;

    /// Suggest completions for partial input.
    async fn auto_complete(&self, request: CompletionRequest)
    -> Result<CompletionReply, RpcError>;

    /// List server-side aliases.
    async fn list_aliases(&self, session_token: &str) -> Result<Vec<AliasInfo>, RpcError>;

    /// Create a server-side alias.
    async fn create_alias(
        &self,
        session_token: &str,
        alias: &str,
        expanded_command: &str,
    ) -> Result<Ack, RpcError>;

    /// Delete a server-side alias.
    async fn delete_alias(&self, session_token: &str, alias: &str) -> Result<Ack, RpcError>;

    /// Tear down the underlying transport. Must be idempotent.
    async fn close(&self);
}

/// Opens transport channels to a command server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the transport. The connect handshake is performed by the caller.
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn CommandService>, RpcError>;
}
