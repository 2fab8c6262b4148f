use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::state::room::{RoomStatus, RoundPhase};

/// Catalog track stored inside song pools and submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackEntity {
    /// Catalog identifier of the track.
    pub track_id: String,
    /// Song title.
    pub track_name: String,
    /// Performing artist.
    pub track_artist: String,
    /// Optional cover art URL.
    #[serde(default)]
    pub track_image: Option<String>,
}

/// Player record embedded in the room document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Opaque external identity.
    pub identity: String,
    /// Display name chosen at join time.
    pub display_name: String,
    /// Whether this player created the room.
    pub is_host: bool,
    /// Whether the player confirmed their song pool.
    pub is_ready: bool,
    /// Whether the player is simulated.
    #[serde(default)]
    pub is_bot: bool,
    /// Accumulated points.
    pub points: u32,
    /// Songs still available for submission.
    pub song_pool: Vec<TrackEntity>,
}

/// Submission embedded in a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionEntity {
    /// Identity of the submitting player.
    pub player_id: String,
    /// Submitted track.
    pub track: TrackEntity,
    /// Identities of the voters.
    pub votes: Vec<String>,
}

/// Round embedded in the room document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// 1-based round number.
    pub number: u32,
    /// Category prompt.
    pub category: String,
    /// Phase the round was in when saved.
    pub phase: RoundPhase,
    /// Absolute expiry of the saved phase.
    pub phase_deadline: SystemTime,
    /// Submissions in order.
    pub submissions: Vec<SubmissionEntity>,
    /// Whether points were already awarded.
    #[serde(default)]
    pub scored: bool,
}

/// Aggregate room entity persisted by the storage layer, keyed by its code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Six character join code, unique across the store.
    pub code: String,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Players in join order.
    pub players: Vec<PlayerEntity>,
    /// Shuffled categories, one per round.
    pub categories: Vec<String>,
    /// Round being played (0 before start).
    pub current_round: u32,
    /// Number of rounds to play.
    pub total_rounds: u32,
    /// Rounds played so far.
    pub rounds: Vec<RoundEntity>,
    /// Whether bots were added to the room.
    #[serde(default)]
    pub simulated: bool,
    /// Write stamp used for optimistic concurrency.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the room was written.
    pub updated_at: SystemTime,
}
