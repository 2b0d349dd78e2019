//! Ledger event bus
//!
//! Every committed fast-ledger write emits exactly one event carrying the
//! absolute post-write counter value. The trigger engine subscribes and
//! mirrors that value into the durable store; because the value is absolute
//! rather than a delta, a lagged or redelivered event can only produce a
//! stale-then-corrected mirror, never a corrupted one.

use tokio::sync::broadcast;
use tracing::trace;

use crate::interaction::InteractionKind;

/// Events emitted by the fast ledger, one per committed write
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// A toggle interaction flipped to present
    ToggledOn {
        entity_id: String,
        kind: InteractionKind,
        actor_id: String,
        /// Absolute post-write counter value
        counter: i64,
    },
    /// A toggle interaction flipped to absent
    ToggledOff {
        entity_id: String,
        kind: InteractionKind,
        actor_id: String,
        counter: i64,
    },
    /// An append-only child record was written
    Appended {
        entity_id: String,
        kind: InteractionKind,
        actor_id: String,
        child_id: String,
        counter: i64,
        /// Content excerpt for notification payloads
        preview: Option<String>,
    },
}

impl LedgerEvent {
    pub fn entity_id(&self) -> &str {
        match self {
            LedgerEvent::ToggledOn { entity_id, .. }
            | LedgerEvent::ToggledOff { entity_id, .. }
            | LedgerEvent::Appended { entity_id, .. } => entity_id,
        }
    }

    pub fn kind(&self) -> InteractionKind {
        match self {
            LedgerEvent::ToggledOn { kind, .. }
            | LedgerEvent::ToggledOff { kind, .. }
            | LedgerEvent::Appended { kind, .. } => *kind,
        }
    }

    /// Absolute counter value after the write
    pub fn counter(&self) -> i64 {
        match self {
            LedgerEvent::ToggledOn { counter, .. }
            | LedgerEvent::ToggledOff { counter, .. }
            | LedgerEvent::Appended { counter, .. } => *counter,
        }
    }
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
