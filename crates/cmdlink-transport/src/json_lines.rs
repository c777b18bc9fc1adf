//! JSON-lines channel to a command server.
//!
//! A single reader task demultiplexes server frames by request id. Unary
//! calls wait on a oneshot; streaming calls drain an unbounded channel
//! that closes on `stream_end`.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use cmdlink_core::{
    CommandService, OutputStream, RpcError,
    rpc::{
        Ack, AliasInfo, CommandInfo, CommandReply, CommandRequest, CompletionReply,
        CompletionRequest, ConnectReply, ConnectRequest, HelpReply, KeepAliveReply, LoginReply,
        OutputEvent, ServiceInfo,
    },
};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::protocol::{Call, RequestFrame, RequestId, ServerFrame};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type UnaryResult = Result<Value, RpcError>;
type StreamItem = Result<OutputEvent, RpcError>;

enum Pending {
    Unary(oneshot::Sender<UnaryResult>),
    Stream(mpsc::UnboundedSender<StreamItem>),
}

struct Shared {
    writer: Mutex<Writer>,
    pending: StdMutex<HashMap<RequestId, Pending>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, frame: ServerFrame) {
        let id = frame.id();
        match frame {
            ServerFrame::Output { event, .. } => {
                let mut pending = self.pending();
                match pending.get(&id) {
                    Some(Pending::Stream(tx)) => {
                        if tx.send(Ok(event)).is_err() {
                            pending.remove(&id);
                        }
                    }
                    Some(Pending::Unary(_)) => {
                        if let Some(Pending::Unary(tx)) = pending.remove(&id) {
                            let _ = tx.send(Err(RpcError::Codec(
                                "output frame for a unary call".to_string(),
                            )));
                        }
                    }
                    None => tracing::debug!(id, "output for unknown request"),
                }
            }
            ServerFrame::Reply { result, .. } => match self.pending().remove(&id) {
                Some(Pending::Unary(tx)) => {
                    let _ = tx.send(Ok(result));
                }
                Some(Pending::Stream(tx)) => {
                    let _ = tx.send(Err(RpcError::Codec(
                        "reply frame for a streaming call".to_string(),
                    )));
                }
                None => tracing::debug!(id, "reply for unknown request"),
            },
            ServerFrame::StreamEnd { .. } => {
                // Dropping the sender ends the stream.
                self.pending().remove(&id);
            }
            ServerFrame::Failure { message, .. } => match self.pending().remove(&id) {
                Some(Pending::Unary(tx)) => {
                    let _ = tx.send(Err(RpcError::Transport(message)));
                }
                Some(Pending::Stream(tx)) => {
                    let _ = tx.send(Err(RpcError::Transport(message)));
                }
                None => tracing::debug!(id, %message, "failure for unknown request"),
            },
        }
    }

    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, pending) in self.pending().drain() {
            match pending {
                Pending::Unary(tx) => {
                    let _ = tx.send(Err(RpcError::Closed));
                }
                Pending::Stream(tx) => {
                    let _ = tx.send(Err(RpcError::Closed));
                }
            }
        }
    }
}

/// Removes a pending entry when the caller stops waiting for it.
struct PendingGuard {
    shared: Arc<Shared>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// Output stream that releases its request slot when dropped.
struct GuardedStream {
    inner: UnboundedReceiverStream<StreamItem>,
    _guard: PendingGuard,
}

impl Stream for GuardedStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Client end of a JSON-lines connection.
pub struct JsonLineChannel {
    shared: Arc<Shared>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl JsonLineChannel {
    /// Start a channel over a reader/writer pair.
    ///
    /// Spawns the reader task on the current runtime.
    #[must_use]
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            read_loop(reader, &reader_shared).await;
            reader_shared.fail_all();
        });

        Self {
            shared,
            reader: StdMutex::new(Some(handle)),
        }
    }

    /// Whether the connection has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for the server.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }

    /// Issue a unary call and decode its result.
    ///
    /// # Errors
    /// Returns error if the channel is closed, the write fails, the server
    /// reports a failure, or the result does not decode as `T`.
    pub async fn call<T: DeserializeOwned>(&self, call: Call) -> Result<T, RpcError> {
        let (tx, rx) = oneshot::channel();
        let guard = self.register(Pending::Unary(tx))?;
        tracing::trace!(id = guard.id, method = call.method(), "unary call");

        self.send(RequestFrame { id: guard.id, call }).await?;
        let value = rx.await.map_err(|_| RpcError::Closed)??;
        drop(guard);
        Ok(serde_json::from_value(value)?)
    }

    /// Issue a streaming call.
    ///
    /// # Errors
    /// Returns error if the channel is closed or the write fails.
    pub async fn stream(&self, call: Call) -> Result<OutputStream, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.register(Pending::Stream(tx))?;
        tracing::trace!(id = guard.id, method = call.method(), "streaming call");

        self.send(RequestFrame { id: guard.id, call }).await?;
        Ok(Box::pin(GuardedStream {
            inner: UnboundedReceiverStream::new(rx),
            _guard: guard,
        }))
    }

    fn register(&self, pending: Pending) -> Result<PendingGuard, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.pending().insert(id, pending);
        Ok(PendingGuard {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    async fn send(&self, frame: RequestFrame) -> Result<(), RpcError> {
        let line = frame.to_line()?;
        let mut writer = self.shared.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn abort_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for JsonLineChannel {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, shared: &Shared) {
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => {
                tracing::debug!("server closed the connection");
                break;
            }
            Ok(_) => {
                let line = buffer.trim();
                if line.is_empty() {
                    continue;
                }
                match ServerFrame::from_line(line) {
                    Ok(frame) => shared.dispatch(frame),
                    Err(e) => tracing::warn!("Ignoring malformed server frame: {e}"),
                }
            }
            Err(e) => {
                tracing::error!("Error reading from server: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl CommandService for JsonLineChannel {
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectReply, RpcError> {
        self.call(Call::Connect(request)).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginReply, RpcError> {
        self.call(Call::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    async fn logout(&self, session_token: &str) -> Result<Ack, RpcError> {
        self.call(Call::Logout {
            session_token: session_token.to_string(),
        })
        .await
    }

    async fn keep_alive(&self, session_token: &str) -> Result<KeepAliveReply, RpcError> {
        self.call(Call::KeepAlive {
            session_token: session_token.to_string(),
        })
        .await
    }

    async fn execute(&self, request: CommandRequest) -> Result<CommandReply, RpcError> {
        self.call(Call::Execute(request)).await
    }

    async fn execute_streaming(&self, request: CommandRequest) -> Result<OutputStream, RpcError> {
        self.stream(Call::ExecuteStreaming(request)).await
    }

    async fn list_services(&self, session_token: &str) -> Result<Vec<ServiceInfo>, RpcError> {
        self.call(Call::ListServices {
            session_token: session_token.to_string(),
        })
        .await
    }

    async fn list_commands(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<Vec<CommandInfo>, RpcError> {
        self.call(Call::ListCommands {
            session_token: session_token.to_string(),
            service: service.to_string(),
        })
        .await
    }

    async fn command_help(
        &self,
        session_token: &str,
        service: &str,
        action: &str,
        subaction: &str,
    ) -> Result<HelpReply, RpcError> {
        self.call(Call::CommandHelp {
            session_token: session_token.to_string(),
            service: service.to_string(),
            action: action.to_string(),
            subaction: subaction.to_string(),
        })
        .await
    }

    async fn auto_complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionReply, RpcError> {
        self.call(Call::AutoComplete(request)).await
    }

    async fn list_aliases(&self, session_token: &str) -> Result<Vec<AliasInfo>, RpcError> {
        self.call(Call::ListAliases {
            session_token: session_token.to_string(),
        })
        .await
    }

    async fn create_alias(
        &self,
        session_token: &str,
        alias: &str,
        expanded_command: &str,
    ) -> Result<Ack, RpcError> {
        self.call(Call::CreateAlias {
            session_token: session_token.to_string(),
            alias: alias.to_string(),
            expanded_command: expanded_command.to_string(),
        })
        .await
    }

    async fn delete_alias(&self, session_token: &str, alias: &str) -> Result<Ack, RpcError> {
        self.call(Call::DeleteAlias {
            session_token: session_token.to_string(),
            alias: alias.to_string(),
        })
        .await
    }

    async fn close(&self) {
        self.abort_reader();
        self.shared.fail_all();
        if let Err(e) = self.shared.writer.lock().await.shutdown().await {
            tracing::debug!("Failed to shut down writer: {e}");
        }
    }
}

/// Opens [`JsonLineChannel`]s over plain TCP.
#[cfg(feature = "tcp")]
#[derive(Debug, Clone)]
pub struct JsonLineConnector {
    connect_timeout: Duration,
}

#[cfg(feature = "tcp")]
impl Default for JsonLineConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(feature = "tcp")]
impl JsonLineConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[cfg(feature = "tcp")]
#[async_trait]
impl cmdlink_core::Connector for JsonLineConnector {
    async fn open(
        &self,
        endpoint: &cmdlink_core::Endpoint,
    ) -> Result<Arc<dyn CommandService>, RpcError> {
        if endpoint.use_tls {
            return Err(RpcError::Transport(
                "TLS is not supported by the JSON-lines transport".to_string(),
            ));
        }

        let stream = tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect((endpoint.address.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| RpcError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;

        tracing::info!("Opened connection to {}", endpoint);
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(JsonLineChannel::spawn(reader, writer)))
    }
}
