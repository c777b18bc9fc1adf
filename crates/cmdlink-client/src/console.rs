//! Command dispatch engine driven by a front end.
//!
//! Input flows through alias expansion, history, the local command
//! interpreter, and finally the session.

use std::{fmt::Write as _, sync::Arc};

use cmdlink_core::{
    AliasError, AliasTable, ClientConfig, ClientEvent, CommandError, Completion,
    CompletionEngine, ConfigError, Connector, EventSink, HistoryStore, LocalCommand,
    RemoteCompleter,
    command::HELP_TEXT,
    completion::format_suggestions,
    rpc::UserInfo,
};
use thiserror::Error;

use crate::{error::ClientError, session::ClientSession};

/// Console error.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Alias(#[from] AliasError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the front end should do after a submitted line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
    ClearScreen,
    /// Ask for a password (and a username when `None`), then call [`Console::login`].
    PromptLogin { username: Option<String> },
}

/// Owns the session together with history, aliases and completion.
pub struct Console {
    session: ClientSession,
    history: HistoryStore,
    aliases: AliasTable,
    completion: CompletionEngine,
    config: ClientConfig,
    sink: Arc<dyn EventSink>,
}

impl Console {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
        config: ClientConfig,
    ) -> Self {
        let session = ClientSession::new(
            connector,
            Arc::clone(&sink),
            config.timeouts.clone(),
        );
        Self {
            session,
            history: HistoryStore::new(config.history.max_entries),
            aliases: AliasTable::new(config.aliases.max_count),
            completion: CompletionEngine::new(),
            config,
            sink,
        }
    }

    /// Handle one line of user input.
    ///
    /// Dropping the future cancels the remote call in flight, including a
    /// `watch` stream. The line stays in history.
    ///
    /// # Errors
    /// Returns error if a local command is malformed or fails, or the remote
    /// command fails.
    pub async fn submit(&mut self, line: &str) -> Result<Outcome, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Outcome::Continue);
        }

        let line = if self.config.aliases.enabled {
            self.aliases.expand(line).into_owned()
        } else {
            line.to_string()
        };
        self.history.record(&line);
        self.history.reset_navigation();

        match LocalCommand::parse(&line)? {
            Some(command) => self.run_local(command).await,
            None => {
                self.session.execute_command(&line).await?;
                Ok(Outcome::Continue)
            }
        }
    }

    /// Log in and start renewing the session.
    ///
    /// # Errors
    /// Returns error if the login fails.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<UserInfo, ConsoleError> {
        let user = self.session.login(username, password).await?;
        self.session
            .start_keep_alive(self.config.keep_alive_interval());
        self.completion.invalidate_cache();
        Ok(user)
    }

    /// Complete partial input against local commands, aliases and the server.
    pub async fn complete(&mut self, text: &str) -> Completion {
        let remote = self
            .session
            .is_connected()
            .then(|| Arc::new(self.session.clone()) as Arc<dyn RemoteCompleter>);
        self.completion.complete(text, remote).await
    }

    /// Emit the formatted suggestion list.
    pub async fn show_suggestions(&self, suggestions: &[String]) {
        if let Some(text) = format_suggestions(suggestions) {
            self.notice(text.trim_end()).await;
        }
    }

    /// Older history entry, if any.
    pub fn history_previous(&mut self) -> Option<String> {
        self.history.previous().map(str::to_string)
    }

    /// Newer history entry; `Some("")` when stepping past the newest.
    pub fn history_next(&mut self) -> Option<String> {
        self.history.next().map(str::to_string)
    }

    /// Read history and aliases from disk.
    ///
    /// # Errors
    /// Returns error if an existing file cannot be read.
    pub async fn load_state(&mut self) -> Result<(), ConsoleError> {
        if let Some(path) = self.config.history_path() {
            self.history.load(&path).await?;
        }
        if let Some(path) = self.config.alias_path() {
            self.aliases.load(&path).await?;
        }
        self.completion.sync_aliases(self.aliases.names());
        Ok(())
    }

    /// Save state and close the session.
    ///
    /// The session is closed even if saving fails.
    ///
    /// # Errors
    /// Returns error if history or aliases cannot be written.
    pub async fn shutdown(&mut self) -> Result<(), ConsoleError> {
        let saved = self.save_state().await;
        self.session.close().await;
        saved
    }

    #[must_use]
    pub const fn session(&self) -> &ClientSession {
        &self.session
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub const fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn save_state(&self) -> Result<(), ConsoleError> {
        if self.config.history.save {
            if let Some(path) = self.config.history_path() {
                self.history.save(&path).await?;
            }
        }
        self.save_aliases().await
    }

    async fn save_aliases(&self) -> Result<(), ConsoleError> {
        if let Some(path) = self.config.alias_path() {
            self.aliases.save(&path).await?;
        }
        Ok(())
    }

    async fn run_local(&mut self, command: LocalCommand) -> Result<Outcome, ConsoleError> {
        tracing::debug!(?command, "local command");
        match command {
            LocalCommand::Help => self.notice(HELP_TEXT).await,
            LocalCommand::Exit => return Ok(Outcome::Exit),
            LocalCommand::Clear => return Ok(Outcome::ClearScreen),
            LocalCommand::Connect { host, port } => {
                let port = port.unwrap_or(self.config.server.port);
                let server = self
                    .session
                    .connect(&host, port, self.config.server.use_tls)
                    .await?;
                self.completion.invalidate_cache();
                self.notice(&format!(
                    "Connected to {} (version {})",
                    server.name, server.version
                ))
                .await;
            }
            LocalCommand::Disconnect => {
                self.session.close().await;
                self.completion.invalidate_cache();
                self.notice("Disconnected").await;
            }
            LocalCommand::Login { username } => {
                if !self.session.is_connected() {
                    return Err(ClientError::NotConnected.into());
                }
                return Ok(Outcome::PromptLogin { username });
            }
            LocalCommand::Logout => {
                self.session.logout().await?;
                self.notice("Logged out").await;
            }
            LocalCommand::ListAliases => {
                let text = if self.aliases.is_empty() {
                    "No aliases defined".to_string()
                } else {
                    let mut text = String::from("Aliases:");
                    for (name, command) in self.aliases.iter() {
                        let _ = write!(text, "\n  {name} = {command}");
                    }
                    text
                };
                self.notice(&text).await;
            }
            LocalCommand::DefineAlias { name, command } => {
                self.aliases.add(&name, &command)?;
                self.aliases_changed().await?;
                self.notice(&format!("Alias '{name}' defined")).await;
            }
            LocalCommand::RemoveAlias { name } => {
                self.aliases.remove(&name)?;
                self.aliases_changed().await?;
                self.notice(&format!("Alias '{name}' removed")).await;
            }
            LocalCommand::History => {
                let mut text = String::from("History:");
                for (i, entry) in self.history.entries().enumerate() {
                    let _ = write!(text, "\n{:>4}  {entry}", i + 1);
                }
                self.notice(&text).await;
            }
            LocalCommand::ShowContext => {
                let context = self.session.service_context();
                let text = if context.is_empty() {
                    "No service context".to_string()
                } else {
                    format!("Service context: {context}")
                };
                self.notice(&text).await;
            }
            LocalCommand::Use { service } => {
                self.session.set_service_context(service.as_str());
                self.sink
                    .emit(ClientEvent::Status(self.session.status()))
                    .await;
                self.notice(&format!("Service context set to {service}"))
                    .await;
            }
            LocalCommand::Status => {
                let status = self.session.status();
                self.notice(&status.summary()).await;
            }
            LocalCommand::Watch { command } => {
                self.session.execute_streaming_command(&command).await?;
            }
        }
        Ok(Outcome::Continue)
    }

    async fn aliases_changed(&mut self) -> Result<(), ConsoleError> {
        self.completion.sync_aliases(self.aliases.names());
        self.save_aliases().await
    }

    async fn notice(&self, text: &str) {
        self.sink.emit(ClientEvent::Notice(text.to_string())).await;
    }
}
