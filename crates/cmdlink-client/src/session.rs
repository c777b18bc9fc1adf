//! Client session against one command server.
//!
//! `ClientSession` owns the transport channel and the session identity
//! (token, state, username). Identity fields live behind a single mutex
//! that is never held across an RPC; the keep-alive task writes them only
//! through a compare-and-clear on the token it pinged with.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use cmdlink_core::{
    ClientEvent, CommandService, Completion, ConnectionState, Connector, Endpoint, EventSink,
    RemoteCompleter, RpcError, ServerIdentity, SessionState, StatusSnapshot,
    config::TimeoutConfig,
    rpc::{
        AliasInfo, CommandInfo, CommandRequest, CompletionRequest, ConnectRequest, HelpReply,
        OutputEvent, OutputKind, ServiceInfo, UserInfo,
    },
};
use futures::StreamExt;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    discovery::{Discovery, ServerSelector},
    error::ClientError,
};

#[derive(Default)]
struct Shared {
    channel: Option<Arc<dyn CommandService>>,
    connection: ConnectionState,
    session: SessionState,
    token: String,
    server: Option<ServerIdentity>,
    username: Option<String>,
    service_context: String,
    remaining_minutes: Option<u32>,
}

impl Shared {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection: self.connection,
            session: self.session,
            server_name: self.server.as_ref().map(|s| s.name.clone()),
            username: self.username.clone(),
            service_context: Some(self.service_context.clone()).filter(|c| !c.is_empty()),
            session_remaining_minutes: self.remaining_minutes,
        }
    }

    fn clear_session(&mut self) {
        self.token.clear();
        self.session = SessionState::NoSession;
        self.username = None;
        self.remaining_minutes = None;
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    timeouts: TimeoutConfig,
    state: Mutex<Shared>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

/// Connection and session lifecycle against one command server.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

impl ClientSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                sink,
                timeouts,
                state: Mutex::new(Shared::default()),
                keep_alive: Mutex::new(None),
            }),
        }
    }

    /// Connect to a server, replacing any existing connection.
    ///
    /// On failure the session is left in `ConnectionError` with no channel.
    ///
    /// # Errors
    /// Returns error if the transport cannot be opened or the handshake fails
    /// or is rejected.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        use_tls: bool,
    ) -> Result<ServerIdentity, ClientError> {
        self.teardown().await;
        self.lock().connection = ConnectionState::Connecting;
        self.publish_status().await;

        let endpoint = Endpoint::new(address, port, use_tls);
        tracing::info!("Connecting to {} (TLS: {})", endpoint, use_tls);
        let limit = self.inner.timeouts.connect();

        let channel = match with_timeout(limit, self.inner.connector.open(&endpoint)).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", endpoint, e);
                self.set_connection_error().await;
                return Err(e);
            }
        };

        let request = ConnectRequest {
            address: address.to_string(),
            port,
            use_tls,
        };
        let reply = match with_timeout(limit, channel.connect(request)).await {
            Ok(reply) if reply.success => reply,
            Ok(reply) => {
                channel.close().await;
                tracing::warn!("Connect rejected by {}: {:?}", endpoint, reply.error_message);
                self.set_connection_error().await;
                return Err(ClientError::rejected("Connect", reply.error_message));
            }
            Err(e) => {
                channel.close().await;
                tracing::warn!("Connect handshake with {} failed: {}", endpoint, e);
                self.set_connection_error().await;
                return Err(e);
            }
        };

        let identity = ServerIdentity {
            name: if reply.server_name.is_empty() {
                address.to_string()
            } else {
                reply.server_name
            },
            address: address.to_string(),
            port,
            version: reply.version,
            tls_enabled: use_tls,
            description: None,
        };
        tracing::info!(
            "Connected to server {} (version {})",
            identity.name,
            identity.version
        );

        {
            let mut state = self.lock();
            state.channel = Some(channel);
            state.connection = ConnectionState::Connected;
            state.clear_session();
            state.server = Some(identity.clone());
        }
        self.publish_status().await;
        Ok(identity)
    }

    /// Discover servers, let `selector` pick one, and connect to it.
    ///
    /// # Errors
    /// Returns error if discovery fails or finds nothing, no server is
    /// selected, or the connect fails.
    pub async fn discover_and_connect(
        &self,
        discovery: &dyn Discovery,
        selector: &dyn ServerSelector,
        timeout: Duration,
    ) -> Result<ServerIdentity, ClientError> {
        tracing::info!("Starting server discovery...");
        let servers = discovery.discover(timeout).await?;
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        tracing::debug!(count = servers.len(), "servers discovered");

        let server = selector
            .select(&servers)
            .await
            .and_then(|index| servers.get(index))
            .ok_or(ClientError::NoSelection)?;
        self.connect(&server.address, server.port, server.tls_enabled)
            .await
    }

    /// Log in with username and password.
    ///
    /// A rejection leaves the session unchanged so the caller can retry.
    /// A transport failure tears down the channel.
    ///
    /// # Errors
    /// Returns error if not connected, on transport failure, or if the server
    /// rejects the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserInfo, ClientError> {
        let channel = self.connected_channel()?;
        tracing::info!("Login as {}...", username);

        let reply = match with_timeout(
            self.inner.timeouts.connect(),
            channel.login(username, password),
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Login request failed: {}", e);
                self.fail_connection().await;
                return Err(e);
            }
        };

        if !reply.success {
            tracing::info!("Login rejected: {:?}", reply.error_message);
            return Err(ClientError::rejected("Login", reply.error_message));
        }
        if reply.session_token.is_empty() {
            return Err(ClientError::Protocol(
                "server accepted login without a session token".to_string(),
            ));
        }

        let user = reply.user.unwrap_or_else(|| UserInfo {
            username: username.to_string(),
            display_name: String::new(),
        });
        {
            let mut state = self.lock();
            state.token = reply.session_token;
            state.session = SessionState::Authenticated;
            state.username = Some(user.username.clone());
            state.remaining_minutes = None;
        }
        tracing::info!("Login successful");

        let display = if user.display_name.is_empty() {
            &user.username
        } else {
            &user.display_name
        };
        self.emit(ClientEvent::Output(format!(
            "Welcome, {display}! You are now logged in."
        )))
        .await;
        self.publish_status().await;
        Ok(user)
    }

    /// End the current session. The connection stays open.
    ///
    /// # Errors
    /// Returns error if not logged in, on transport failure, or if the server
    /// rejects the logout.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        tracing::info!("Logout...");

        let result = with_timeout(self.inner.timeouts.connect(), channel.logout(&token)).await;
        let ack = self.observe(&channel, result).await?;
        if !ack.success {
            return Err(ClientError::rejected("Logout", ack.error_message));
        }

        self.stop_keep_alive();
        self.lock().clear_session();
        tracing::info!("Logout successful");
        self.publish_status().await;
        Ok(())
    }

    /// Execute a command and deliver its output.
    ///
    /// Does not require a login; the server decides. On success the output is
    /// emitted and a server-reported context replaces the local one.
    ///
    /// # Errors
    /// Returns error if not connected, on transport failure, or if the server
    /// reports the command failed.
    pub async fn execute_command(&self, line: &str) -> Result<StatusSnapshot, ClientError> {
        let channel = self.connected_channel()?;
        let request = self.command_request(line);
        tracing::info!("Executing command: {}", line);

        let result = with_timeout(self.inner.timeouts.command(), channel.execute(request)).await;
        let reply = self.observe(&channel, result).await?;

        if reply.success {
            if let Some(context) = reply.new_context.filter(|c| !c.is_empty()) {
                tracing::debug!("New service context: {}", context);
                self.lock().service_context = context;
            }
            if !reply.output.is_empty() {
                self.emit(ClientEvent::Output(reply.output)).await;
            }
        }

        let status = reply.status.unwrap_or_else(|| self.status());
        self.emit(ClientEvent::Status(status.clone())).await;

        if reply.success {
            Ok(status)
        } else {
            tracing::info!("Command failed: {:?}", reply.error_message);
            Err(ClientError::rejected("Command", reply.error_message))
        }
    }

    /// Execute a command whose output is streamed.
    ///
    /// Each event is emitted as it arrives, in server order. Progress updates
    /// are logged only. The whole stream is bounded by the streaming timeout.
    /// Dropping the returned future cancels the stream and releases it.
    ///
    /// # Errors
    /// Returns error if not connected, the stream cannot be opened, fails
    /// mid-way, or times out.
    pub async fn execute_streaming_command(&self, line: &str) -> Result<(), ClientError> {
        let channel = self.connected_channel()?;
        let request = self.command_request(line);
        tracing::info!("Executing streaming command: {}", line);

        let consume = async {
            let mut stream = channel.execute_streaming(request).await?;
            while let Some(event) = stream.next().await {
                self.forward_output(event?).await;
            }
            Ok::<(), RpcError>(())
        };

        let result = with_timeout(self.inner.timeouts.streaming(), consume).await;
        match self.observe(&channel, result).await {
            Ok(()) => {
                tracing::info!("Streaming command completed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Streaming command failed: {}", e);
                Err(e)
            }
        }
    }

    /// Ask the server for completions of `partial_input`.
    ///
    /// The common prefix is computed locally from the returned suggestions.
    ///
    /// # Errors
    /// Returns error if not connected, on timeout, or on transport failure.
    pub async fn auto_complete(
        &self,
        partial_input: &str,
        cursor_position: usize,
    ) -> Result<Completion, ClientError> {
        let channel = self.connected_channel()?;
        let request = {
            let state = self.lock();
            CompletionRequest {
                session_token: state.token.clone(),
                partial_input: partial_input.to_string(),
                current_context: state.service_context.clone(),
                cursor_position,
            }
        };

        let result =
            with_timeout(self.inner.timeouts.completion(), channel.auto_complete(request)).await;
        let reply = self.observe(&channel, result).await?;
        Ok(Completion::new(reply.suggestions))
    }

    /// Services available to the session.
    ///
    /// # Errors
    /// Returns error if not logged in or on transport failure.
    pub async fn list_services(&self) -> Result<Vec<ServiceInfo>, ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result =
            with_timeout(self.inner.timeouts.connect(), channel.list_services(&token)).await;
        self.observe(&channel, result).await
    }

    /// Commands of one service.
    ///
    /// # Errors
    /// Returns error if not logged in or on transport failure.
    pub async fn list_commands(&self, service: &str) -> Result<Vec<CommandInfo>, ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result = with_timeout(
            self.inner.timeouts.connect(),
            channel.list_commands(&token, service),
        )
        .await;
        self.observe(&channel, result).await
    }

    /// Help for `service.action.subaction`.
    ///
    /// # Errors
    /// Returns error if not logged in or on transport failure.
    pub async fn command_help(
        &self,
        service: &str,
        action: &str,
        subaction: &str,
    ) -> Result<HelpReply, ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result = with_timeout(
            self.inner.timeouts.connect(),
            channel.command_help(&token, service, action, subaction),
        )
        .await;
        self.observe(&channel, result).await
    }

    /// Server-side aliases of the current user.
    ///
    /// # Errors
    /// Returns error if not logged in or on transport failure.
    pub async fn list_remote_aliases(&self) -> Result<Vec<AliasInfo>, ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result =
            with_timeout(self.inner.timeouts.connect(), channel.list_aliases(&token)).await;
        self.observe(&channel, result).await
    }

    /// Create a server-side alias.
    ///
    /// # Errors
    /// Returns error if not logged in, on transport failure, or if the server
    /// rejects the alias.
    pub async fn create_remote_alias(
        &self,
        alias: &str,
        expanded_command: &str,
    ) -> Result<(), ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result = with_timeout(
            self.inner.timeouts.connect(),
            channel.create_alias(&token, alias, expanded_command),
        )
        .await;
        let ack = self.observe(&channel, result).await?;
        if ack.success {
            Ok(())
        } else {
            Err(ClientError::rejected("Create alias", ack.error_message))
        }
    }

    /// Delete a server-side alias.
    ///
    /// # Errors
    /// Returns error if not logged in, on transport failure, or if the server
    /// rejects the deletion.
    pub async fn delete_remote_alias(&self, alias: &str) -> Result<(), ClientError> {
        let (channel, token) = self.authenticated_channel()?;
        let result = with_timeout(
            self.inner.timeouts.connect(),
            channel.delete_alias(&token, alias),
        )
        .await;
        let ack = self.observe(&channel, result).await?;
        if ack.success {
            Ok(())
        } else {
            Err(ClientError::rejected("Delete alias", ack.error_message))
        }
    }

    /// Start renewing the session every `interval`.
    ///
    /// The task stops on its own when the session is no longer authenticated
    /// or the server reports it invalid; each login needs a fresh call.
    /// Starting again replaces a running task.
    pub fn start_keep_alive(&self, interval: Duration) {
        if interval.is_zero() {
            tracing::warn!("Keep-alive interval is zero, not starting");
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(keep_alive_loop(weak, interval));
        let previous = self
            .inner
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::debug!(?interval, "keep-alive started");
    }

    /// Whether a keep-alive task is still running.
    #[must_use]
    pub fn keep_alive_running(&self) -> bool {
        self.inner
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Close the connection and reset the session. Idempotent.
    pub async fn close(&self) {
        let had_channel = self.teardown().await;
        if had_channel {
            tracing::info!("Connection closed");
            self.publish_status().await;
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.lock().session
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        let state = self.lock();
        state.connection == ConnectionState::Connected && state.channel.is_some()
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.lock().session == SessionState::Authenticated
    }

    /// Current session token; empty unless logged in.
    #[must_use]
    pub fn session_token(&self) -> String {
        self.lock().token.clone()
    }

    #[must_use]
    pub fn server_identity(&self) -> Option<ServerIdentity> {
        self.lock().server.clone()
    }

    #[must_use]
    pub fn service_context(&self) -> String {
        self.lock().service_context.clone()
    }

    /// Override the service context until the server reports a new one.
    pub fn set_service_context(&self, context: impl Into<String>) {
        self.lock().service_context = context.into();
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connected_channel(&self) -> Result<Arc<dyn CommandService>, ClientError> {
        let state = self.lock();
        match (&state.channel, state.connection) {
            (Some(channel), ConnectionState::Connected) => Ok(Arc::clone(channel)),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn authenticated_channel(&self) -> Result<(Arc<dyn CommandService>, String), ClientError> {
        let channel = self.connected_channel()?;
        let state = self.lock();
        if state.session != SessionState::Authenticated || state.token.is_empty() {
            return Err(ClientError::NotLoggedIn);
        }
        Ok((channel, state.token.clone()))
    }

    fn command_request(&self, line: &str) -> CommandRequest {
        let state = self.lock();
        CommandRequest {
            session_token: state.token.clone(),
            command_line: line.to_string(),
            last_context: state.service_context.clone(),
        }
    }

    async fn forward_output(&self, event: OutputEvent) {
        match event.kind {
            OutputKind::Text => self.emit(ClientEvent::Output(event.content)).await,
            OutputKind::Error => {
                tracing::debug!("Streaming error: {}", event.content);
                self.emit(ClientEvent::Error(event.content)).await;
            }
            OutputKind::Completion => {
                tracing::debug!("Streaming command complete: {}", event.content);
                self.emit(ClientEvent::Completed(event.content)).await;
            }
            OutputKind::StatusUpdate => {
                tracing::debug!(
                    progress = ?event.progress_percent,
                    "Status update: {}",
                    event.content
                );
            }
        }
    }

    /// Clear the token if it is still `token`. Returns whether it was.
    fn expire_session(&self, token: &str) -> bool {
        let mut state = self.lock();
        if state.session != SessionState::Authenticated || state.token != token {
            return false;
        }
        state.clear_session();
        state.session = SessionState::SessionExpired;
        true
    }

    fn set_remaining_minutes(&self, token: &str, minutes: Option<u32>) {
        let mut state = self.lock();
        if state.token == token {
            state.remaining_minutes = minutes;
        }
    }

    /// Pass `result` through, resetting the session if the server hung up.
    async fn observe<T>(
        &self,
        channel: &Arc<dyn CommandService>,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        if result.as_ref().is_err_and(ClientError::is_closed)
            && self.connection_lost(channel).await
        {
            self.stop_keep_alive();
        }
        result
    }

    /// Reset every field if `channel` is still the current one.
    ///
    /// Returns whether the session was reset.
    async fn connection_lost(&self, channel: &Arc<dyn CommandService>) -> bool {
        let lost = {
            let mut state = self.lock();
            let current = state
                .channel
                .as_ref()
                .is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(channel)));
            if current {
                *state = Shared::default();
            }
            current
        };
        if lost {
            tracing::warn!("Connection to server lost");
            channel.close().await;
            self.emit(ClientEvent::Notice("Connection to server lost".to_string()))
                .await;
            self.publish_status().await;
        }
        lost
    }

    async fn set_connection_error(&self) {
        {
            let mut state = self.lock();
            state.channel = None;
            state.connection = ConnectionState::ConnectionError;
            state.clear_session();
            state.server = None;
        }
        self.publish_status().await;
    }

    /// Drop the channel after a transport failure.
    async fn fail_connection(&self) {
        self.stop_keep_alive();
        let channel = self.lock().channel.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.set_connection_error().await;
    }

    /// Stop keep-alive, close the channel and reset every field.
    ///
    /// Returns whether a channel was open.
    async fn teardown(&self) -> bool {
        self.stop_keep_alive();
        let channel = std::mem::take(&mut *self.lock()).channel;
        match channel {
            Some(channel) => {
                channel.close().await;
                true
            }
            None => false,
        }
    }

    fn stop_keep_alive(&self) {
        let handle = self
            .inner
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn publish_status(&self) {
        let status = self.status();
        self.emit(ClientEvent::Status(status)).await;
    }

    async fn emit(&self, event: ClientEvent) {
        self.inner.sink.emit(event).await;
    }
}

async fn keep_alive_loop(weak: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = ClientSession { inner };

        let Ok((channel, token)) = session.authenticated_channel() else {
            tracing::debug!("Keep-alive stopping: not logged in");
            break;
        };

        match with_timeout(
            session.inner.timeouts.keep_alive(),
            channel.keep_alive(&token),
        )
        .await
        {
            Ok(reply) if reply.session_valid => {
                tracing::trace!(remaining = ?reply.remaining_minutes, "session renewed");
                session.set_remaining_minutes(&token, reply.remaining_minutes);
            }
            Ok(_) => {
                if session.expire_session(&token) {
                    tracing::warn!("Session expired");
                    session
                        .emit(ClientEvent::Notice(
                            "Session expired, please log in again".to_string(),
                        ))
                        .await;
                    session.publish_status().await;
                }
                break;
            }
            Err(e) if e.is_closed() => {
                session.connection_lost(&channel).await;
                break;
            }
            Err(e) => tracing::warn!("Keep-alive failed: {}", e),
        }
    }
}

#[async_trait]
impl RemoteCompleter for ClientSession {
    async fn complete_remote(
        &self,
        partial_input: String,
        cursor_position: usize,
    ) -> Option<Completion> {
        match self.auto_complete(&partial_input, cursor_position).await {
            Ok(completion) => Some(completion),
            Err(e) => {
                tracing::debug!("Auto-complete failed: {}", e);
                None
            }
        }
    }
}

async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RpcError::Timeout(limit).into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use cmdlink_core::RecordingSink;

    use super::*;
    use crate::{
        discovery::{FirstServer, StaticDiscovery},
        testing::{FakeConnector, FakeServer, session_with, session_with_timeouts},
    };

    async fn connected() -> (ClientSession, Arc<FakeServer>, Arc<RecordingSink>) {
        let (session, server, sink) = session_with(FakeServer::default());
        session.connect("localhost", 50051, false).await.unwrap();
        (session, server, sink)
    }

    #[tokio::test]
    async fn test_connect_records_identity() {
        let (session, _server, sink) = connected().await;

        assert!(session.is_connected());
        assert_eq!(session.session_state(), SessionState::NoSession);
        let identity = session.server_identity().unwrap();
        assert_eq!(identity.name, "alpha");
        assert_eq!(identity.version, "1.2.0");
        assert_eq!(identity.endpoint(), "localhost:50051");

        let states: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Status(s) => Some(s.connection),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_channel() {
        let connector = FakeConnector::refusing();
        let sink = Arc::new(RecordingSink::new());
        let session = ClientSession::new(Arc::new(connector), sink, TimeoutConfig::default());

        let err = session.connect("nowhere", 1, false).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(session.connection_state(), ConnectionState::ConnectionError);
        assert!(!session.is_connected());
        assert!(matches!(
            session.execute_command("x").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_rejection_closes_channel() {
        let server = FakeServer {
            refuse_connect: true,
            ..FakeServer::default()
        };
        let (session, server, _sink) = session_with(server);

        let err = session.connect("localhost", 50051, false).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { .. }));
        assert_eq!(session.connection_state(), ConnectionState::ConnectionError);
        assert!(server.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_login_requires_connection() {
        let (session, _server, _sink) = session_with(FakeServer::default());
        assert!(matches!(
            session.login("bob", "good-pass").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_login_rejection_then_success() {
        let (session, _server, sink) = connected().await;

        let err = session.login("bob", "bad-pass").await.unwrap_err();
        match err {
            ClientError::Rejected { reason, .. } => assert_eq!(reason, "Invalid credentials"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(session.session_state(), SessionState::NoSession);
        assert!(session.session_token().is_empty());

        let user = session.login("bob", "good-pass").await.unwrap();
        assert_eq!(user.username, "bob");
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(session.session_state(), SessionState::Authenticated);
        assert!(!session.session_token().is_empty());
        assert!(sink.messages().contains(&ClientEvent::Output(
            "Welcome, Bob Builder! You are now logged in.".into()
        )));
    }

    #[tokio::test]
    async fn test_login_transport_failure_tears_down() {
        let (session, server, _sink) = connected().await;
        server.fail_login.store(true, Ordering::SeqCst);

        let err = session.login("bob", "good-pass").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(session.connection_state(), ConnectionState::ConnectionError);
        assert!(server.closed.load(Ordering::SeqCst));
        assert!(session.session_token().is_empty());
    }

    #[tokio::test]
    async fn test_logout_keeps_connection() {
        let (session, _server, _sink) = connected().await;
        assert!(matches!(session.logout().await, Err(ClientError::NotLoggedIn)));

        session.login("bob", "good-pass").await.unwrap();
        session.logout().await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.session_state(), SessionState::NoSession);
        assert!(session.session_token().is_empty());
    }

    #[tokio::test]
    async fn test_execute_updates_context() {
        let (session, server, sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        sink.take();

        let status = session.execute_command("Billing.Invoice.List").await.unwrap();
        assert_eq!(status.service_context.as_deref(), Some("Billing"));
        assert_eq!(session.service_context(), "Billing");
        assert_eq!(
            sink.messages(),
            vec![ClientEvent::Output("ran Billing.Invoice.List".into())]
        );

        session.execute_command("List").await.unwrap();
        let requests = server.requests();
        assert_eq!(requests[1].last_context, "Billing");
        assert_eq!(requests[1].session_token, session.session_token());
    }

    #[tokio::test]
    async fn test_execute_failure_keeps_context() {
        let (session, _server, _sink) = connected().await;
        session.set_service_context("Users");

        let err = session.execute_command("fail.now").await.unwrap_err();
        assert_eq!(err.to_string(), "Command failed: Unknown command");
        assert_eq!(session.service_context(), "Users");
    }

    #[tokio::test]
    async fn test_streaming_forwards_in_order() {
        let server = FakeServer {
            stream: vec![
                OutputEvent::text("a"),
                OutputEvent {
                    kind: OutputKind::StatusUpdate,
                    content: "50%".into(),
                    progress_percent: Some(50),
                },
                OutputEvent::text("b"),
                OutputEvent::new(OutputKind::Completion, "done"),
            ],
            ..FakeServer::default()
        };
        let (session, _server, sink) = session_with(server);
        session.connect("localhost", 50051, false).await.unwrap();
        sink.take();

        tokio_test::assert_ok!(session.execute_streaming_command("Jobs.Run").await);
        assert_eq!(
            sink.messages(),
            vec![
                ClientEvent::Output("a".into()),
                ClientEvent::Output("b".into()),
                ClientEvent::Completed("done".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_streaming_mid_stream_failure() {
        let server = FakeServer {
            stream: vec![OutputEvent::text("a")],
            break_stream: true,
            ..FakeServer::default()
        };
        let (session, _server, sink) = session_with(server);
        session.connect("localhost", 50051, false).await.unwrap();
        sink.take();

        let err = session.execute_streaming_command("Jobs.Run").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(sink.messages(), vec![ClientEvent::Output("a".into())]);
    }

    #[tokio::test]
    async fn test_streaming_timeout_keeps_delivered_events() {
        let server = FakeServer {
            stream: vec![OutputEvent::text("a")],
            endless_stream: true,
            ..FakeServer::default()
        };
        let timeouts = TimeoutConfig {
            streaming_ms: 50,
            ..TimeoutConfig::default()
        };
        let (session, server, sink) = session_with_timeouts(server, timeouts);
        session.connect("localhost", 50051, false).await.unwrap();
        sink.take();

        let err = session.execute_streaming_command("Jobs.Tail").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(RpcError::Timeout(_))));
        assert_eq!(sink.messages(), vec![ClientEvent::Output("a".into())]);
        assert_eq!(server.open_streams.load(Ordering::SeqCst), 0);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_streaming_call_releases_stream() {
        let server = FakeServer {
            endless_stream: true,
            ..FakeServer::default()
        };
        let (session, server, _sink) = session_with(server);
        session.connect("localhost", 50051, false).await.unwrap();

        let call = session.execute_streaming_command("Jobs.Tail");
        let outcome = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert!(outcome.is_err());
        assert_eq!(server.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hang_up_resets_session() {
        let (session, server, sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        session.start_keep_alive(Duration::from_secs(60));
        sink.take();
        server.hung_up.store(true, Ordering::SeqCst);

        let err = session.execute_command("Billing.Invoice.List").await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(session.status(), StatusSnapshot::default());
        assert!(!session.is_connected());
        assert!(session.session_token().is_empty());
        assert!(!session.keep_alive_running());
        assert!(server.closed.load(Ordering::SeqCst));
        assert!(sink.messages().contains(&ClientEvent::Notice(
            "Connection to server lost".into()
        )));
        assert!(sink.events().contains(&ClientEvent::Status(StatusSnapshot::default())));

        assert!(matches!(
            session.execute_command("Billing.Invoice.List").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_keep_alive_notices_hang_up() {
        let (session, server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        server.hung_up.store(true, Ordering::SeqCst);

        session.start_keep_alive(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.session_state(), SessionState::NoSession);
        assert!(!session.keep_alive_running());
        assert_eq!(server.keep_alive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_complete_computes_prefix() {
        let (session, _server, _sink) = connected().await;
        let completion = session.auto_complete("Billing.I", 9).await.unwrap();
        assert_eq!(completion.suggestions, vec!["Billing.Invoice", "Billing.Item"]);
        assert_eq!(completion.common_prefix, "Billing.I");
        assert_eq!(session.session_state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_catalogue_requires_login() {
        let (session, _server, _sink) = connected().await;
        assert!(matches!(
            session.list_services().await,
            Err(ClientError::NotLoggedIn)
        ));

        session.login("bob", "good-pass").await.unwrap();
        let services = session.list_services().await.unwrap();
        assert_eq!(services[0].name, "Billing");
        let commands = session.list_commands("Billing").await.unwrap();
        assert_eq!(commands[0].name, "Invoice");
        let help = session.command_help("Billing", "Invoice", "List").await.unwrap();
        assert!(help.help_text.contains("Billing.Invoice.List"));
    }

    #[tokio::test]
    async fn test_remote_alias_crud() {
        let (session, _server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();

        session.create_remote_alias("inv", "Billing.Invoice.List").await.unwrap();
        assert!(matches!(
            session.create_remote_alias("inv", "x").await,
            Err(ClientError::Rejected { .. })
        ));
        let aliases = session.list_remote_aliases().await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].expanded_command, "Billing.Invoice.List");

        session.delete_remote_alias("inv").await.unwrap();
        assert!(session.list_remote_aliases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keep_alive_expiry_clears_token() {
        let (session, server, sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        server.session_valid.store(false, Ordering::SeqCst);

        session.start_keep_alive(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.session_state(), SessionState::SessionExpired);
        assert!(session.session_token().is_empty());
        assert!(session.is_connected());
        assert!(!session.keep_alive_running());
        assert_eq!(server.keep_alive_calls.load(Ordering::SeqCst), 1);
        assert!(sink.messages().contains(&ClientEvent::Notice(
            "Session expired, please log in again".into()
        )));
    }

    #[tokio::test]
    async fn test_keep_alive_renews_while_valid() {
        let (session, server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();

        session.start_keep_alive(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(session.is_logged_in());
        assert!(session.keep_alive_running());
        assert!(server.keep_alive_calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(session.status().session_remaining_minutes, Some(30));

        session.logout().await.unwrap();
        assert!(!session.keep_alive_running());
    }

    #[tokio::test]
    async fn test_keep_alive_stops_when_logged_out() {
        let (session, server, _sink) = connected().await;
        session.start_keep_alive(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!session.keep_alive_running());
        assert_eq!(server.keep_alive_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_expiry_does_not_clobber_relogin() {
        let (session, _server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        let old_token = session.session_token();

        session.login("bob", "good-pass").await.unwrap();
        assert_ne!(session.session_token(), old_token);

        assert!(!session.expire_session(&old_token));
        assert!(session.is_logged_in());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();
        session.set_service_context("Billing");

        session.close().await;
        session.close().await;
        assert!(server.closed.load(Ordering::SeqCst));
        assert_eq!(session.status(), StatusSnapshot::default());
        assert!(session.server_identity().is_none());
    }

    #[tokio::test]
    async fn test_discover_and_connect() {
        let (session, _server, _sink) = session_with(FakeServer::default());
        let discovery = StaticDiscovery::new(vec![ServerIdentity {
            name: "alpha".into(),
            address: "localhost".into(),
            port: 50051,
            ..ServerIdentity::default()
        }]);

        let identity = session
            .discover_and_connect(&discovery, &FirstServer, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(identity.address, "localhost");
        assert!(session.is_connected());
    }

    struct NoChoice;

    #[async_trait]
    impl ServerSelector for NoChoice {
        async fn select(&self, _servers: &[ServerIdentity]) -> Option<usize> {
            None
        }
    }

    #[tokio::test]
    async fn test_failed_discovery_keeps_connection() {
        let (session, server, _sink) = connected().await;
        session.login("bob", "good-pass").await.unwrap();

        let empty = StaticDiscovery::new(Vec::new());
        assert!(matches!(
            session
                .discover_and_connect(&empty, &FirstServer, Duration::from_millis(50))
                .await,
            Err(ClientError::NoServers)
        ));

        let found = StaticDiscovery::new(vec![ServerIdentity::default()]);
        assert!(matches!(
            session
                .discover_and_connect(&found, &NoChoice, Duration::from_millis(50))
                .await,
            Err(ClientError::NoSelection)
        ));

        assert!(session.is_connected());
        assert!(session.is_logged_in());
        assert!(!server.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_remote_completer_swallows_errors() {
        let (session, _server, _sink) = session_with(FakeServer::default());
        assert!(session.complete_remote("Billing.".to_string(), 8).await.is_none());
    }
}
