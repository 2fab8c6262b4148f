use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Rooms currently driven by an in-memory actor.
    pub active_rooms: usize,
    /// Open realtime connections.
    pub connections: usize,
}

impl HealthResponse {
    /// Build a response from the degraded flag and the live counters.
    pub fn new(degraded: bool, active_rooms: usize, connections: usize) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            active_rooms,
            connections,
        }
    }
}
