use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Capacity of each spectator channel; slower subscribers skip ahead.
const SPECTATOR_CAPACITY: usize = 64;

/// Per-room broadcast hubs feeding the SSE spectator streams.
#[derive(Default)]
pub struct SpectatorHubs {
    hubs: DashMap<String, SseHub>,
}

impl SpectatorHubs {
    /// Register a new spectator of `room`, creating its hub on first use.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(room.to_string())
            .or_insert_with(|| SseHub::new(SPECTATOR_CAPACITY))
            .subscribe()
    }

    /// Forward an event to the spectators of `room`, if any.
    pub fn broadcast(&self, room: &str, event: ServerEvent) {
        if let Some(hub) = self.hubs.get(room) {
            hub.broadcast(event);
        }
    }

    /// Drop the hub of `room` once nobody listens to it anymore.
    pub fn prune(&self, room: &str) {
        self.hubs.remove_if(room, |_, hub| hub.receiver_count() == 0);
    }

    /// Drop every hub, closing all spectator streams.
    pub fn clear(&self) {
        self.hubs.clear();
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_the_watched_room() {
        let hubs = SpectatorHubs::default();
        let mut watcher = hubs.subscribe("ABC234");

        hubs.broadcast("ZZZ999", ServerEvent { event: None, data: "other".into() });
        hubs.broadcast(
            "ABC234",
            ServerEvent {
                event: Some("room_snapshot".into()),
                data: "{}".into(),
            },
        );

        let event = watcher.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("room_snapshot"));
        assert!(watcher.try_recv().is_err());
    }

    #[test]
    fn prune_keeps_hubs_with_listeners() {
        let hubs = SpectatorHubs::default();
        let watcher = hubs.subscribe("ABC234");
        hubs.prune("ABC234");
        assert!(hubs.hubs.contains_key("ABC234"));

        drop(watcher);
        hubs.prune("ABC234");
        assert!(!hubs.hubs.contains_key("ABC234"));
    }
}
