//! Output sink for session events.
//!
//! Every session forwards its output and its exit status to an [`EventSink`].
//! The sink is a bounded channel: a full channel applies backpressure to the
//! PTY reader, so output is never reordered or lost while a consumer exists.
//! Once the consumer drops its receiver, events are silently discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::SessionId;

/// Default channel capacity for session events.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// An event produced by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chunk of process output.
    Data { id: SessionId, data: Vec<u8> },
    /// The process exited. Emitted exactly once per session.
    Exit { id: SessionId, exit_code: i32 },
}

impl SessionEvent {
    /// The session this event belongs to.
    pub fn id(&self) -> &str {
        match self {
            SessionEvent::Data { id, .. } | SessionEvent::Exit { id, .. } => id,
        }
    }

    /// Whether this is the final event of its session.
    pub fn is_exit(&self) -> bool {
        matches!(self, SessionEvent::Exit { .. })
    }
}

/// Delivery statistics for a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Events handed to the consumer.
    pub delivered: u64,
    /// Events discarded because the consumer was gone.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Capability to deliver session events to a consumer.
///
/// Cloning a sink is cheap; all clones share the same channel and counters.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
    counters: Arc<Counters>,
}

impl EventSink {
    /// Creates a sink with the default capacity.
    pub fn new() -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    /// Creates a sink with a specific channel capacity.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = EventSink {
            tx,
            counters: Arc::new(Counters::default()),
        };
        (sink, rx)
    }

    /// Delivers an event, waiting for channel space.
    ///
    /// Returns false if the consumer has gone away.
    pub async fn deliver(&self, event: SessionEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => self.record_delivered(),
            Err(mpsc::error::SendError(event)) => self.record_dropped(&event),
        }
    }

    /// Delivers an event from a blocking thread.
    ///
    /// Must not be called from inside the async runtime.
    pub fn deliver_blocking(&self, event: SessionEvent) -> bool {
        match self.tx.blocking_send(event) {
            Ok(()) => self.record_delivered(),
            Err(mpsc::error::SendError(event)) => self.record_dropped(&event),
        }
    }

    /// Whether the consumer has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns a snapshot of the delivery counters.
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn record_delivered(&self) -> bool {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn record_dropped(&self, event: &SessionEvent) -> bool {
        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            session_id = %event.id(),
            dropped = dropped,
            "Sink closed, dropping event"
        );
        false
    }
}
