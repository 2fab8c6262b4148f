use serde::Serialize;
use utoipa::ToSchema;

/// One frame of a spectator stream: optional event name plus serialized payload.
#[derive(Clone, Debug)]
pub struct ServerEvent {
    /// SSE `event:` field; clients receive unnamed frames as `message`.
    pub event: Option<String>,
    /// SSE `data:` field, always JSON.
    pub data: String,
}

impl ServerEvent {
    /// Frame carrying an already serialized payload under `name`.
    pub fn named(name: &str, data: String) -> Self {
        Self {
            event: Some(name.to_string()),
            data,
        }
    }

    /// Serialize `payload` into a frame named `name`.
    pub fn json<T: Serialize>(name: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::named(name, serde_json::to_string(payload)?))
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First frame sent to a spectator when it connects.
pub struct Handshake {
    /// Code of the room being watched.
    pub room: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}
