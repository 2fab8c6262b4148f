use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{
        room::{AwardView, LeaderboardEntry, RoomSnapshot, SubmissionView, TrackInput},
        validation::{validate_display_name, validate_identity, validate_room_code},
    },
    error::ServiceError,
};

/// Most bots a single request may add.
pub const MAX_BOTS_PER_REQUEST: usize = 8;
/// Largest song pool a player may bring.
pub const MAX_POOL_SIZE: usize = 50;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room hosted by the sender.
    CreateRoom {
        identity: String,
        name: String,
        total_rounds: u32,
    },
    /// Enter a waiting room.
    Join {
        code: String,
        identity: String,
        name: String,
    },
    /// Reattach an existing player to a room in any status.
    Resume { code: String, identity: String },
    /// Mark the sender ready, optionally replacing their song pool.
    Ready {
        #[serde(default)]
        songs: Option<Vec<TrackInput>>,
    },
    /// Submit a song from the sender's pool.
    Submit { track_id: String },
    /// Vote for another player's submission.
    Vote { player_id: String },
    /// Fill the room with simulated players.
    AddBots { count: usize },
    /// Force the next phase (test mode, host only).
    Advance,
    /// Ask for a fresh snapshot of the room.
    Snapshot,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ServiceError> {
        let message: Self = serde_json::from_str(text)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed message: {err}")))?;
        message.validate()?;
        Ok(message)
    }

    /// Name used in acknowledgements and logs.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::Join { .. } => "join",
            ClientMessage::Resume { .. } => "resume",
            ClientMessage::Ready { .. } => "ready",
            ClientMessage::Submit { .. } => "submit",
            ClientMessage::Vote { .. } => "vote",
            ClientMessage::AddBots { .. } => "add_bots",
            ClientMessage::Advance => "advance",
            ClientMessage::Snapshot => "snapshot",
            ClientMessage::Unknown => "unknown",
        }
    }
}

fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match self {
            ClientMessage::CreateRoom {
                identity,
                name,
                total_rounds,
            } => {
                if let Err(e) = validate_identity(identity) {
                    errors.add("identity", e);
                }
                if let Err(e) = validate_display_name(name) {
                    errors.add("name", e);
                }
                if *total_rounds == 0 {
                    errors.add(
                        "total_rounds",
                        field_error("range", "total_rounds must be at least 1"),
                    );
                }
            }
            ClientMessage::Join {
                code,
                identity,
                name,
            } => {
                if let Err(e) = validate_room_code(code) {
                    errors.add("code", e);
                }
                if let Err(e) = validate_identity(identity) {
                    errors.add("identity", e);
                }
                if let Err(e) = validate_display_name(name) {
                    errors.add("name", e);
                }
            }
            ClientMessage::Resume { code, identity } => {
                if let Err(e) = validate_room_code(code) {
                    errors.add("code", e);
                }
                if let Err(e) = validate_identity(identity) {
                    errors.add("identity", e);
                }
            }
            ClientMessage::Ready { songs: Some(songs) } => {
                if songs.is_empty() || songs.len() > MAX_POOL_SIZE {
                    errors.add(
                        "songs",
                        field_error("length", "songs must hold between 1 and 50 tracks"),
                    );
                }
                for song in songs {
                    if let Err(song_errors) = song.validate() {
                        errors.merge_self("songs", Err(song_errors));
                    }
                }
            }
            ClientMessage::Submit { track_id } if track_id.trim().is_empty() => {
                errors.add("track_id", field_error("blank", "track_id must not be blank"));
            }
            ClientMessage::Vote { player_id } => {
                if let Err(e) = validate_identity(player_id) {
                    errors.add("player_id", e);
                }
            }
            ClientMessage::AddBots { count } if *count == 0 || *count > MAX_BOTS_PER_REQUEST => {
                errors.add(
                    "count",
                    field_error("range", "count must be between 1 and 8"),
                );
            }
            ClientMessage::Unknown => {
                errors.add("type", field_error("unknown", "unknown message type"));
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Messages pushed to player WebSocket clients and spectator streams.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The connection is now attached to a room as `identity`.
    Joined {
        identity: String,
        room: RoomSnapshot,
    },
    /// The named action succeeded.
    Ack { action: String },
    /// The last action failed.
    Error { code: String, message: String },
    /// Current state of the room.
    RoomSnapshot { room: RoomSnapshot },
    /// A submitted song starts playing.
    NowPlaying {
        round: u32,
        index: usize,
        submission: SubmissionView,
    },
    /// Points awarded for a round.
    RoundResults {
        round: u32,
        awards: Vec<AwardView>,
        leaderboard: Vec<LeaderboardEntry>,
    },
}

impl ServerMessage {
    /// Tag of the message, also used as SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::Error { .. } => "error",
            ServerMessage::RoomSnapshot { .. } => "room_snapshot",
            ServerMessage::NowPlaying { .. } => "now_playing",
            ServerMessage::RoundResults { .. } => "round_results",
        }
    }

    /// Structured error event for a failed action.
    pub fn error(err: &ServiceError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
