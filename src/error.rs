use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{
        room::RoundPhase,
        state_machine::{ApplyError, PlanError},
    },
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No room is stored under this code.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// The room already left the lobby.
    #[error("room `{0}` is no longer accepting players")]
    GameAlreadyInProgress(String),
    /// The identity is not a player of the room.
    #[error("player `{0}` is not in this room")]
    PlayerNotInRoom(String),
    /// The action is not valid in the current phase.
    #[error("action requires the {expected} phase (current: {})", display_phase(.actual))]
    WrongPhase {
        /// Phase the action belongs to.
        expected: RoundPhase,
        /// Phase the room is in, if a round is running.
        actual: Option<RoundPhase>,
    },
    /// A player tried to vote for their own submission.
    #[error("players cannot vote for their own submission")]
    SelfVoteRejected,
    /// The game cannot start with so few ready players.
    #[error("at least 2 ready players are required (got {ready})")]
    InsufficientPlayers {
        /// Number of ready players at the time of the attempt.
        ready: usize,
    },
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

fn display_phase(phase: &Option<RoundPhase>) -> &'static str {
    phase.map_or("none", RoundPhase::as_str)
}

impl ServiceError {
    /// Stable machine readable code sent to realtime clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::RoomNotFound(_) => "room_not_found",
            ServiceError::GameAlreadyInProgress(_) => "game_already_in_progress",
            ServiceError::PlayerNotInRoom(_) => "player_not_in_room",
            ServiceError::WrongPhase { .. } => "wrong_phase",
            ServiceError::SelfVoteRejected => "self_vote_rejected",
            ServiceError::InsufficientPlayers { .. } => "insufficient_players",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Unavailable(_) | ServiceError::Degraded => "storage_unavailable",
            ServiceError::Timeout => "timeout",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NotReady { ready, players } if ready < 2 || players < 2 => {
                ServiceError::InsufficientPlayers { ready }
            }
            PlanError::NotReady { ready, players } => ServiceError::InvalidState(format!(
                "only {ready} of {players} players are ready"
            )),
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "room changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "room version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::RoomNotFound(_) | ServiceError::PlayerNotInRoom(_) => {
                AppError::NotFound(message)
            }
            ServiceError::GameAlreadyInProgress(_)
            | ServiceError::WrongPhase { .. }
            | ServiceError::InsufficientPlayers { .. }
            | ServiceError::InvalidState(_) => AppError::Conflict(message),
            ServiceError::SelfVoteRejected | ServiceError::InvalidInput(_) => {
                AppError::BadRequest(message)
            }
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
