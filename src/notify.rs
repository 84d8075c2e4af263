use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ItemId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-item broadcast of applied events. Slow subscribers lag rather than
/// block the engine.
pub struct NotifyHub {
    channels: DashMap<ItemId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for an item. Creates the channel if needed.
    pub fn subscribe(&self, item_id: &str) -> broadcast::Receiver<Event> {
        self.channels
            .entry(item_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send an event to its item's subscribers. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(event.item_id()) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
