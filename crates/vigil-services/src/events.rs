//! Event-publisher implementations.
//!
//! All of them honor the fire-and-forget contract: a failed delivery is
//! logged and swallowed, never surfaced to the operation that emitted it.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vigil_core::events::EventPublisher;

/// Logs every event through `tracing`; the default publisher when no
/// event bus is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event_type: &str, source: &str, _payload: Value) {
        debug!(event_type, source, "lifecycle event");
    }
}

/// Drops every event. Useful for tools that replay state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event_type: &str, _source: &str, _payload: Value) {}
}

/// One published event, as observed by a [`ChannelEventPublisher`]
/// receiver.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_type: String,
    pub source: String,
    pub payload: Value,
}

/// Forwards events over an unbounded channel; the transport layer (or a
/// test) drains the receiver.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    tx: mpsc::UnboundedSender<PublishedEvent>,
}

impl ChannelEventPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event_type: &str, source: &str, payload: Value) {
        let event = PublishedEvent {
            event_type: event_type.to_string(),
            source: source.to_string(),
            payload,
        };
        if self.tx.send(event).is_err() {
            warn!(event_type, "event receiver dropped; discarding event");
        }
    }
}
