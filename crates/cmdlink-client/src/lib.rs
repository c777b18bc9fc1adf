//! Session management and command dispatch for the cmdlink client.
//!
//! Provides:
//! - `ClientSession` - Connection, login and keep-alive against one server
//! - `Console` - The dispatch engine a front end drives
//! - Discovery implementations (static list, multicast)

pub mod console;
pub mod discovery;
pub mod error;
pub mod session;

#[cfg(test)]
mod testing;

pub use console::{Console, ConsoleError, Outcome};
pub use discovery::{Discovery, FirstServer, ServerSelector, StaticDiscovery};
#[cfg(feature = "multicast")]
pub use discovery::MulticastDiscovery;
pub use error::ClientError;
pub use session::ClientSession;
