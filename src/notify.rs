use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of applied events: one channel per room plus one for site-wide
/// changes (content, settings). Open calendars subscribe to refresh themselves.
pub struct NotifyHub {
    rooms: DashMap<Ulid, broadcast::Sender<Event>>,
    site: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            site: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to a room's events. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_site(&self) -> broadcast::Receiver<Event> {
        self.site.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.rooms.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn send_site(&self, event: &Event) {
        let _ = self.site.send(event.clone());
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, sender| sender.receiver_count() > 0);
        before - self.rooms.len()
    }
}
