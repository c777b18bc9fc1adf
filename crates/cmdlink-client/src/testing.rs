//! In-process fakes shared by the unit tests.

use std::{
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use cmdlink_core::{
    CommandService, Connector, Endpoint, OutputStream, RecordingSink, RpcError,
    config::TimeoutConfig,
    rpc::{
        Ack, AliasInfo, CommandInfo, CommandReply, CommandRequest, CompletionReply,
        CompletionRequest, ConnectReply, ConnectRequest, HelpReply, KeepAliveReply, LoginReply,
        OutputEvent, ServiceInfo, UserInfo,
    },
};
use futures::{Stream, StreamExt};

use crate::ClientSession;

const COMPLETIONS: &[&str] = &["Billing.Invoice", "Billing.Item", "Users.Find"];

pub struct FakeServer {
    pub refuse_connect: bool,
    pub fail_login: AtomicBool,
    pub session_valid: AtomicBool,
    pub keep_alive_calls: AtomicUsize,
    pub closed: AtomicBool,
    /// Every call fails as if the server hung up.
    pub hung_up: AtomicBool,
    pub stream: Vec<OutputEvent>,
    pub break_stream: bool,
    /// Keep the stream open after `stream` is sent.
    pub endless_stream: bool,
    /// Streams handed out and not yet dropped.
    pub open_streams: Arc<AtomicUsize>,
    pub logins: AtomicUsize,
    pub commands: Mutex<Vec<CommandRequest>>,
    pub aliases: Mutex<Vec<AliasInfo>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            refuse_connect: false,
            fail_login: AtomicBool::new(false),
            session_valid: AtomicBool::new(true),
            keep_alive_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            hung_up: AtomicBool::new(false),
            stream: Vec::new(),
            break_stream: false,
            endless_stream: false,
            open_streams: Arc::new(AtomicUsize::new(0)),
            logins: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            aliases: Mutex::new(Vec::new()),
        }
    }
}

impl FakeServer {
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.commands.lock().unwrap().clone()
    }

    fn check_line(&self) -> Result<(), RpcError> {
        if self.hung_up.load(Ordering::SeqCst) {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Stream wrapper counting how many are alive.
struct CountedStream {
    inner: OutputStream,
    open: Arc<AtomicUsize>,
}

impl CountedStream {
    fn new(inner: OutputStream, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner, open }
    }
}

impl Drop for CountedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Stream for CountedStream {
    type Item = Result<OutputEvent, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[async_trait]
impl CommandService for FakeServer {
    async fn connect(&self, _request: ConnectRequest) -> Result<ConnectReply, RpcError> {
        if self.refuse_connect {
            return Ok(ConnectReply {
                success: false,
                error_message: Some("server full".into()),
                ..ConnectReply::default()
            });
        }
        Ok(ConnectReply {
            success: true,
            error_message: None,
            server_name: "alpha".into(),
            version: "1.2.0".into(),
        })
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginReply, RpcError> {
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection reset".into()));
        }
        if password != "good-pass" {
            return Ok(LoginReply {
                success: false,
                error_message: Some("Invalid credentials".into()),
                ..LoginReply::default()
            });
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(LoginReply {
            success: true,
            error_message: None,
            session_token: format!("token-{n}"),
            user: Some(UserInfo {
                username: username.to_string(),
                display_name: "Bob Builder".into(),
            }),
        })
    }

    async fn logout(&self, _session_token: &str) -> Result<Ack, RpcError> {
        self.check_line()?;
        Ok(Ack::ok())
    }

    async fn keep_alive(&self, _session_token: &str) -> Result<KeepAliveReply, RpcError> {
        self.keep_alive_calls.fetch_add(1, Ordering::SeqCst);
        self.check_line()?;
        Ok(KeepAliveReply {
            session_valid: self.session_valid.load(Ordering::SeqCst),
            remaining_minutes: Some(30),
        })
    }

    async fn execute(&self, request: CommandRequest) -> Result<CommandReply, RpcError> {
        self.check_line()?;
        let line = request.command_line.clone();
        self.commands.lock().unwrap().push(request);

        if line.starts_with("fail") {
            return Ok(CommandReply {
                success: false,
                error_message: Some("Unknown command".into()),
                ..CommandReply::default()
            });
        }
        let new_context = line
            .split_once('.')
            .map(|(service, _)| service.to_string());
        Ok(CommandReply {
            success: true,
            output: format!("ran {line}"),
            new_context,
            ..CommandReply::default()
        })
    }

    async fn execute_streaming(&self, request: CommandRequest) -> Result<OutputStream, RpcError> {
        self.check_line()?;
        self.commands.lock().unwrap().push(request);
        let mut items: Vec<Result<OutputEvent, RpcError>> =
            self.stream.iter().cloned().map(Ok).collect();
        if self.break_stream {
            items.push(Err(RpcError::Transport("stream reset".into())));
        }
        let stream: OutputStream = if self.endless_stream {
            Box::pin(futures::stream::iter(items).chain(futures::stream::pending()))
        } else {
            Box::pin(futures::stream::iter(items))
        };
        Ok(Box::pin(CountedStream::new(
            stream,
            Arc::clone(&self.open_streams),
        )))
    }

    async fn list_services(&self, _session_token: &str) -> Result<Vec<ServiceInfo>, RpcError> {
        self.check_line()?;
        Ok(vec![
            ServiceInfo {
                name: "Billing".into(),
                description: "Invoices".into(),
            },
            ServiceInfo {
                name: "Users".into(),
                description: "Accounts".into(),
            },
        ])
    }

    async fn list_commands(
        &self,
        _session_token: &str,
        service: &str,
    ) -> Result<Vec<CommandInfo>, RpcError> {
        Ok(vec![CommandInfo {
            name: "Invoice".into(),
            description: format!("{service} invoices"),
            syntax: format!("{service}.Invoice.List [year]"),
        }])
    }

    async fn command_help(
        &self,
        _session_token: &str,
        service: &str,
        action: &str,
        subaction: &str,
    ) -> Result<HelpReply, RpcError> {
        Ok(HelpReply {
            help_text: format!("{service}.{action}.{subaction}: lists things"),
            command: None,
        })
    }

    async fn auto_complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionReply, RpcError> {
        self.check_line()?;
        let suggestions = COMPLETIONS
            .iter()
            .filter(|c| c.starts_with(&request.partial_input))
            .map(|c| (*c).to_string())
            .collect();
        Ok(CompletionReply {
            suggestions,
            common_prefix: String::new(),
        })
    }

    async fn list_aliases(&self, _session_token: &str) -> Result<Vec<AliasInfo>, RpcError> {
        Ok(self.aliases.lock().unwrap().clone())
    }

    async fn create_alias(
        &self,
        _session_token: &str,
        alias: &str,
        expanded_command: &str,
    ) -> Result<Ack, RpcError> {
        let mut aliases = self.aliases.lock().unwrap();
        if aliases.iter().any(|a| a.alias == alias) {
            return Ok(Ack::rejected("alias exists"));
        }
        aliases.push(AliasInfo {
            alias: alias.to_string(),
            expanded_command: expanded_command.to_string(),
        });
        Ok(Ack::ok())
    }

    async fn delete_alias(&self, _session_token: &str, alias: &str) -> Result<Ack, RpcError> {
        let mut aliases = self.aliases.lock().unwrap();
        let before = aliases.len();
        aliases.retain(|a| a.alias != alias);
        if aliases.len() == before {
            Ok(Ack::rejected("no such alias"))
        } else {
            Ok(Ack::ok())
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    server: Option<Arc<FakeServer>>,
}

impl FakeConnector {
    pub fn serving(server: Arc<FakeServer>) -> Self {
        Self {
            server: Some(server),
        }
    }

    pub const fn refusing() -> Self {
        Self { server: None }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _endpoint: &Endpoint) -> Result<Arc<dyn CommandService>, RpcError> {
        match &self.server {
            Some(server) => {
                server.closed.store(false, Ordering::SeqCst);
                Ok(Arc::clone(server) as Arc<dyn CommandService>)
            }
            None => Err(RpcError::Transport("connection refused".into())),
        }
    }
}

/// A disconnected session wired to `server`.
pub fn session_with(server: FakeServer) -> (ClientSession, Arc<FakeServer>, Arc<RecordingSink>) {
    session_with_timeouts(server, TimeoutConfig::default())
}

pub fn session_with_timeouts(
    server: FakeServer,
    timeouts: TimeoutConfig,
) -> (ClientSession, Arc<FakeServer>, Arc<RecordingSink>) {
    let server = Arc::new(server);
    let sink = Arc::new(RecordingSink::new());
    let session = ClientSession::new(
        Arc::new(FakeConnector::serving(Arc::clone(&server))),
        Arc::clone(&sink) as Arc<dyn cmdlink_core::EventSink>,
        timeouts,
    );
    (session, server, sink)
}
