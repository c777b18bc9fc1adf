//! Core building blocks for the cmdlink command client.
//!
//! This crate provides:
//! - `HistoryStore` - Bounded, navigable command history
//! - `AliasTable` - Persisted first-token alias expansion
//! - `CompletionEngine` - Local + remote completion with a prefix cache
//! - `LocalCommand` - Client-side command interpreter
//! - `CommandService` / `Connector` - The remote command protocol
//! - `EventSink` - Event delivery to the presentation layer
//! - `ClientConfig` - TOML configuration with defaults

pub mod alias;
pub mod command;
pub mod completion;
pub mod config;
pub mod events;
pub mod history;
pub mod persist;
pub mod rpc;
pub mod status;
pub mod traits;

pub use alias::{AliasError, AliasTable};
pub use command::{CommandError, LocalCommand};
pub use completion::{Completion, CompletionEngine, RemoteCompleter};
pub use config::{ClientConfig, ConfigError};
pub use events::{ChannelSink, ClientEvent, EventSink, NullSink, RecordingSink};
pub use history::HistoryStore;
pub use status::{ConnectionState, ServerIdentity, SessionState, StatusSnapshot};
pub use traits::{CommandService, Connector, Endpoint, OutputStream, RpcError};
