use std::collections::HashSet;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::{sse::ServerEvent, ws::ServerMessage},
    state::sse::SpectatorHubs,
};

/// Identifier of a realtime connection.
pub type ConnectionId = Uuid;

/// Handle used to push messages to a connected player.
#[derive(Clone)]
pub struct ClientConnection {
    /// Outbound queue drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Room and identity once a join succeeded.
    pub seat: Option<Seat>,
}

/// Where a connection sits once attached to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    /// Room code.
    pub room: String,
    /// Player identity inside that room.
    pub identity: String,
}

/// Registry of live connections and of the rooms they are attached to.
///
/// Created once at server start and cleared at shutdown.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ClientConnection>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    spectators: SpectatorHubs,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened connection that is not attached to any room yet.
    pub fn register(&self, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(id, ClientConnection { tx, seat: None });
        id
    }

    /// Attach a connection to a room, leaving the room it was in before.
    pub fn attach(&self, id: ConnectionId, room: &str, identity: &str) {
        let previous = match self.connections.get_mut(&id) {
            Some(mut connection) => connection.seat.replace(Seat {
                room: room.to_string(),
                identity: identity.to_string(),
            }),
            None => {
                warn!(connection = %id, room, "cannot attach unknown connection");
                return;
            }
        };

        if let Some(previous) = previous {
            self.leave_room(&previous.room, id);
        }
        self.rooms.entry(room.to_string()).or_default().insert(id);
    }

    /// Forget a connection entirely, returning the seat it occupied.
    pub fn detach(&self, id: ConnectionId) -> Option<Seat> {
        let (_, connection) = self.connections.remove(&id)?;
        let seat = connection.seat?;
        self.leave_room(&seat.room, id);
        Some(seat)
    }

    fn leave_room(&self, room: &str, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Seat of a connection, if attached.
    pub fn seat(&self, id: ConnectionId) -> Option<Seat> {
        self.connections
            .get(&id)
            .and_then(|connection| connection.seat.clone())
    }

    /// Number of connections attached to `room`.
    pub fn connection_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Number of open connections, attached or not.
    pub fn total(&self) -> usize {
        self.connections.len()
    }

    /// Unicast a message to one connection; returns false when it is gone.
    pub fn send(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(tx) = self.connections.get(&id).map(|c| c.tx.clone()) else {
            return false;
        };
        match serde_json::to_string(message) {
            Ok(payload) => tx.send(Message::Text(payload.into())).is_ok(),
            Err(err) => {
                warn!(error = %err, kind = message.kind(), "failed to serialize message");
                false
            }
        }
    }

    /// Fan a message out to every connection of `room` and to its spectators.
    ///
    /// Never blocks: each connection owns an unbounded queue.
    pub fn broadcast_room(&self, room: &str, message: &ServerMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, room, kind = message.kind(), "failed to serialize broadcast");
                return;
            }
        };

        let members: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();

        for id in members {
            let Some(tx) = self.connections.get(&id).map(|c| c.tx.clone()) else {
                continue;
            };
            if tx.send(Message::Text(payload.clone().into())).is_err() {
                debug!(connection = %id, room, "dropping message for closed connection");
            }
        }

        self.spectators
            .broadcast(room, ServerEvent::named(message.kind(), payload));
    }

    /// Subscribe to the spectator stream of `room`.
    pub fn subscribe_spectator(&self, room: &str) -> broadcast::Receiver<ServerEvent> {
        self.spectators.subscribe(room)
    }

    /// Release resources held for a room whose actor stopped.
    pub fn release_room(&self, room: &str) {
        self.spectators.prune(room);
    }

    /// Close every connection and spectator stream.
    pub fn clear(&self) {
        for connection in self.connections.iter() {
            let _ = connection.tx.send(Message::Close(None));
        }
        self.connections.clear();
        self.rooms.clear();
        self.spectators.clear();
    }
}
