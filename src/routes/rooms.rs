use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        room::{CreateRoomRequest, RoomSnapshot},
        validation::validate_room_code,
    },
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes handling room creation and inspection.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{code}", get(get_room))
}

/// Open a new lobby hosted by the caller.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomSnapshot),
        (status = 400, description = "Invalid payload"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomSnapshot>), AppError> {
    let CreateRoomRequest {
        identity,
        name,
        total_rounds,
    } = payload;
    let room = room_service::create_room(&state, identity, name, total_rounds).await?;
    Ok((StatusCode::CREATED, Json(RoomSnapshot::from(&room))))
}

/// Current client-safe snapshot of a room.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six character room code")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    validate_room_code(&code).map_err(|_| AppError::BadRequest(format!("invalid room code `{code}`")))?;
    let room = room_service::snapshot(&state, &code).await?;
    Ok(Json(RoomSnapshot::from(&room)))
}
