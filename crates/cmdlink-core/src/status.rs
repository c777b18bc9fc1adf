//! Connection and session status types.

use serde::{Deserialize, Serialize};

/// Transport-level connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel is open.
    #[default]
    Disconnected,
    /// A connect handshake is in flight.
    Connecting,
    /// The handshake succeeded and the channel is usable.
    Connected,
    /// The last connect (or login transport) attempt failed.
    ConnectionError,
}

/// Authentication state of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not logged in.
    #[default]
    NoSession,
    /// Logged in with a valid token.
    Authenticated,
    /// The server requires a login for the requested operation.
    LoginRequired,
    /// The server reports the session is about to expire.
    SessionExpiring,
    /// Keep-alive detected that the server invalidated the session.
    SessionExpired,
}

/// Identity of a command server, as reported by discovery or the connect handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Short display name.
    pub name: String,
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Server software version.
    #[serde(default)]
    pub version: String,
    /// Whether the server expects TLS.
    #[serde(default)]
    pub tls_enabled: bool,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerIdentity {
    /// `address:port` form used for logging and de-duplication.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Point-in-time view of connection and session state.
///
/// Produced locally on every state transition and optionally returned by
/// the server alongside a command reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub session: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_remaining_minutes: Option<u32>,
}

impl StatusSnapshot {
    /// One-line human readable summary, e.g. `connected to alpha | logged in as bob | ctx: Billing`.
    #[must_use]
    pub fn summary(&self) -> String {
        let connection = match (self.connection, self.server_name.as_deref()) {
            (ConnectionState::Disconnected, _) => "offline".to_string(),
            (ConnectionState::Connecting, _) => "connecting".to_string(),
            (ConnectionState::Connected, Some(name)) => format!("connected to {name}"),
            (ConnectionState::Connected, None) => "connected".to_string(),
            (ConnectionState::ConnectionError, _) => "connection error".to_string(),
        };
        let session = match (self.session, self.username.as_deref()) {
            (SessionState::NoSession, _) => "not logged in".to_string(),
            (SessionState::Authenticated, Some(user)) => format!("logged in as {user}"),
            (SessionState::Authenticated, None) => "logged in".to_string(),
            (SessionState::LoginRequired, _) => "login required".to_string(),
            (SessionState::SessionExpiring, _) => match self.session_remaining_minutes {
                Some(minutes) => format!("session expires in {minutes} min"),
                None => "session expiring".to_string(),
            },
            (SessionState::SessionExpired, _) => "session expired".to_string(),
        };

        let mut out = format!("{connection} | {session}");
        if let Some(ctx) = self.service_context.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(" | ctx: ");
            out.push_str(ctx);
        }
        out
    }
}
