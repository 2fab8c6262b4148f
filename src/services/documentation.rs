use utoipa::OpenApi;

#[derive(OpenApi)]
/// OpenAPI document describing the Song Wars Back HTTP surface.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::sse::room_events,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::TrackInput,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::sse::Handshake,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room creation and snapshots"),
        (name = "sse", description = "Spectator event streams"),
        (name = "players", description = "WebSocket gateway for players"),
    )
)]
pub struct ApiDoc;
