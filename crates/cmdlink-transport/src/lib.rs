//! Transport layer for the cmdlink command protocol.
//!
//! Provides:
//! - Wire frames (JSON lines, one object per line)
//! - A multiplexing channel implementing `CommandService`
//! - A TCP connector (feature: tcp)

pub mod json_lines;
pub mod protocol;

#[cfg(feature = "tcp")]
pub use json_lines::JsonLineConnector;
pub use json_lines::JsonLineChannel;
pub use protocol::{Call, RequestFrame, ServerFrame};
