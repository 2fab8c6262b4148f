use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{
    dto::validation::validate_room_code, error::AppError, services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/rooms/{code}/events",
    tag = "sse",
    params(("code" = String, Path, description = "Six character room code")),
    responses(
        (status = 200, description = "Spectator SSE stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown room")
    )
)]
/// Stream every broadcast of a room to a shared-screen display.
pub async fn room_events(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    validate_room_code(&code).map_err(|_| AppError::BadRequest(format!("invalid room code `{code}`")))?;
    let (receiver, initial) = sse_service::spectate(&state, &code).await?;
    Ok(sse_service::to_sse_stream(code, receiver, initial))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{code}/events", get(room_events))
}
