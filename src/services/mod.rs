/// Room, playback and results announcements.
pub mod broadcast;
/// Simulated players.
pub mod bots;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-room actor serializing mutations and timers.
pub mod room_actor;
/// Room code generation.
pub mod room_code;
/// Room creation and intent dispatch.
pub mod room_service;
/// Spectator Server-Sent Events streams.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
