//! Client-side command interpreter.
//!
//! Lines whose first token is a local command are handled by the client
//! and never reach the server.

use thiserror::Error;

/// Keywords that aliases may not shadow: every word the interpreter handles.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "help",
    "?",
    "login",
    "logout",
    "alias",
    "unalias",
    "exit",
    "quit",
    "clear",
    "cls",
    "history",
    "use",
    "connect",
    "disconnect",
    "status",
    "watch",
];

/// Built-in completion vocabulary, in help order.
pub const LOCAL_COMMANDS: &[&str] = &[
    "help",
    "?",
    "exit",
    "quit",
    "clear",
    "cls",
    "connect",
    "disconnect",
    "login",
    "logout",
    "alias",
    "unalias",
    "history",
    "use",
    "status",
    "watch",
];

/// Help text listing the local commands.
pub const HELP_TEXT: &str = "\
Local commands:
  help, ?                 show this help
  connect <host> [port]   connect to a server
  disconnect              close the connection
  login [user]            log in
  logout                  log out
  use [service]           show or set the service context
  alias                   list local aliases
  alias <name>=<command>  define a local alias
  unalias <name>          remove a local alias
  history                 show command history
  status                  show connection status
  watch <command>         run a command with streamed output
  clear, cls              clear the output
  exit, quit              leave the client
Anything else is sent to the server as Service.Action.SubAction args";

/// Whether `word` is a reserved keyword (case-insensitive).
#[must_use]
pub fn is_reserved_keyword(word: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(word))
}

/// Local command parse error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Syntax: {0}")]
    Usage(&'static str),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Alias name cannot be empty")]
    EmptyAlias,
    #[error("Alias command cannot be empty")]
    EmptyCommand,
}

/// A command handled by the client itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Help,
    Exit,
    Clear,
    Connect { host: String, port: Option<u16> },
    Disconnect,
    Login { username: Option<String> },
    Logout,
    ListAliases,
    DefineAlias { name: String, command: String },
    RemoveAlias { name: String },
    History,
    ShowContext,
    Use { service: String },
    Status,
    Watch { command: String },
}

impl LocalCommand {
    /// Parse `line` as a local command.
    ///
    /// Returns `Ok(None)` when the first token is not a local command.
    ///
    /// # Errors
    /// Returns error if the line names a local command with invalid arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            "clear" | "cls" => Self::Clear,
            "connect" => parse_connect(rest)?,
            "disconnect" => Self::Disconnect,
            "login" => Self::Login {
                username: rest.split_whitespace().next().map(str::to_string),
            },
            "logout" => Self::Logout,
            "alias" if rest.is_empty() => Self::ListAliases,
            "alias" => parse_alias(rest)?,
            "unalias" if rest.is_empty() => return Err(CommandError::Usage("unalias <name>")),
            "unalias" => Self::RemoveAlias {
                name: rest.to_string(),
            },
            "history" => Self::History,
            "use" if rest.is_empty() => Self::ShowContext,
            "use" => Self::Use {
                service: rest.to_string(),
            },
            "status" => Self::Status,
            "watch" if rest.is_empty() => return Err(CommandError::Usage("watch <command>")),
            "watch" => Self::Watch {
                command: rest.to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn parse_connect(args: &str) -> Result<LocalCommand, CommandError> {
    const USAGE: &str = "connect <host> [port]";

    let parts = shlex::split(args).ok_or(CommandError::Usage(USAGE))?;
    let mut parts = parts.into_iter();
    let host = parts.next().ok_or(CommandError::Usage(USAGE))?;
    let port = parts
        .next()
        .map(|p| p.parse::<u16>().map_err(|_| CommandError::InvalidPort(p)))
        .transpose()?;

    Ok(LocalCommand::Connect { host, port })
}

fn parse_alias(definition: &str) -> Result<LocalCommand, CommandError> {
    let (name, command) = definition
        .split_once('=')
        .ok_or(CommandError::Usage("alias <name>=<command>"))?;
    let (name, command) = (name.trim(), command.trim());

    if name.is_empty() {
        return Err(CommandError::EmptyAlias);
    }
    if command.is_empty() {
        return Err(CommandError::EmptyCommand);
    }

    Ok(LocalCommand::DefineAlias {
        name: name.to_string(),
        command: command.to_string(),
    })
}
