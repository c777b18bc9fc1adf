//! Event delivery from the client core to the presentation layer.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::StatusSnapshot;

/// Default capacity of the UI event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something the UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Command output.
    Output(String),
    /// Informational message produced locally.
    Notice(String),
    /// Error text (server-reported or local).
    Error(String),
    /// A streaming command finished.
    Completed(String),
    /// Connection or session state changed.
    Status(StatusSnapshot),
}

/// Observer for client events.
///
/// Events are emitted in the order they occur; implementations must not
/// reorder them.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ClientEvent);
}

/// Sink that forwards events into a bounded channel.
///
/// Applies backpressure when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<ClientEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver the UI drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ClientEvent) {
        if self.sender.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ClientEvent) {}
}

/// Sink that keeps every event in memory.
///
/// Useful for headless callers and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ClientEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the recorded events.
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Recorded events other than status updates.
    #[must_use]
    pub fn messages(&self) -> Vec<ClientEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, ClientEvent::Status(_)))
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: ClientEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
