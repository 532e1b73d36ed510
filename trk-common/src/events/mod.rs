//! Event types for the TRK event system
//!
//! Provides shared event definitions and the EventBus used for server-push
//! notifications.

mod job_types;

pub use job_types::JobStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// TRK event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrkEvent {
    /// A job was accepted by the registry
    JobSubmitted {
        job_id: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// A job moved forward in its state machine
    JobStatusChanged {
        job_id: String,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// A palette was created or written; `version` is the new token
    PaletteUpdated {
        palette_id: String,
        version: i64,
        timestamp: DateTime<Utc>,
    },

    /// A palette was overwritten from one of its snapshots
    PaletteRestored {
        palette_id: String,
        snapshot_ts: String,
        version: i64,
        timestamp: DateTime<Utc>,
    },

    /// A palette and its snapshots were removed
    PaletteDeleted {
        palette_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl TrkEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &str {
        match self {
            TrkEvent::JobSubmitted { .. } => "JobSubmitted",
            TrkEvent::JobStatusChanged { .. } => "JobStatusChanged",
            TrkEvent::PaletteUpdated { .. } => "PaletteUpdated",
            TrkEvent::PaletteRestored { .. } => "PaletteRestored",
            TrkEvent::PaletteDeleted { .. } => "PaletteDeleted",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// ```
/// use trk_common::events::{EventBus, TrkEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(TrkEvent::PaletteDeleted {
///     palette_id: "p1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "PaletteDeleted");
/// ```
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TrkEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TrkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: TrkEvent) -> Result<usize, broadcast::error::SendError<TrkEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TrkEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
