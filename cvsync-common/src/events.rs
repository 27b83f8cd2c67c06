//! Run events and the in-process event bus
//!
//! Enrichment runs publish lifecycle and progress events on an [`EventBus`].
//! Listeners (console reporters, external notifiers) subscribe independently;
//! a run never waits on, or fails because of, a listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during an enrichment run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A run started (or resumed) at `start_index`
    RunStarted {
        job: String,
        start_index: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress notification
    Progress {
        job: String,
        done: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One unit reached its final outcome
    UnitCompleted {
        job: String,
        unit_id: String,
        status: String,
        source_tag: Option<String>,
        from_cache: bool,
        timestamp: DateTime<Utc>,
    },

    /// The run finished (`interrupted` when stopped before the end of the list)
    RunCompleted {
        job: String,
        next_index: usize,
        total: usize,
        interrupted: bool,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Job name carried by every event
    pub fn job(&self) -> &str {
        match self {
            SyncEvent::RunStarted { job, .. }
            | SyncEvent::Progress { job, .. }
            | SyncEvent::UnitCompleted { job, .. }
            | SyncEvent::RunCompleted { job, .. } => job,
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use cvsync_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
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
