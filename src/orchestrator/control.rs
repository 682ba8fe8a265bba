use tokio::sync::broadcast;

use super::events::ConversationEvent;

pub(super) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out for [`ConversationEvent`]s. Sending never blocks and never fails
/// the turn when nobody listens.
#[derive(Debug, Clone)]
pub(super) struct EventEmitter {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventEmitter {
    pub(super) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(super) fn emit(&self, event: ConversationEvent) {
        let _ = self.tx.send(event);
    }

    /// Snapshots are only worth building when someone is listening.
    pub(super) fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }
}

pub(super) fn debug_enabled() -> bool {
    matches!(std::env::var("PARLEY_DEBUG").as_deref(), Ok("1"))
}
