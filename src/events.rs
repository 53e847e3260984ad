//! Event sinks
//!
//! Functions fire tagged events (`zypper/blocked`, `zypper/released`) while
//! they wait on a locked package manager. Where they end up is up to the
//! caller: the log, or a channel the embedding application drains.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

/// Receiver of `(tag, data)` events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn fire(&self, tag: &str, data: Value);
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn fire(&self, tag: &str, data: Value) {
        info!(tag = %tag, data = %data, "Event fired");
    }
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn fire(&self, tag: &str, data: Value) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send((tag.to_string(), data));
    }
}
