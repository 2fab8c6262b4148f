use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{
        format_system_time,
        validation::{validate_display_name, validate_identity},
    },
    state::{
        room::{Player, Room, RoomStatus, Round, RoundPhase, Submission, Track},
        scoring::{Award, leaderboard},
    },
};

/// Payload used to open a new room over HTTP.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Identity of the host.
    #[validate(custom(function = "validate_identity"))]
    pub identity: String,
    /// Host display name.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    /// Number of rounds to play.
    #[validate(range(min = 1))]
    pub total_rounds: u32,
}

/// Catalog track supplied by a client when marking itself ready.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct TrackInput {
    #[validate(length(min = 1, max = 128))]
    pub track_id: String,
    #[validate(length(min = 1, max = 256))]
    pub track_name: String,
    #[validate(length(min = 1, max = 256))]
    pub track_artist: String,
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub track_image: Option<String>,
}

impl From<TrackInput> for Track {
    fn from(value: TrackInput) -> Self {
        Self {
            track_id: value.track_id,
            track_name: value.track_name,
            track_artist: value.track_artist,
            track_image: value.track_image,
        }
    }
}

/// Track metadata as shown to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackView {
    pub track_id: String,
    pub track_name: String,
    pub track_artist: String,
    pub track_image: Option<String>,
}

impl From<&Track> for TrackView {
    fn from(track: &Track) -> Self {
        Self {
            track_id: track.track_id.clone(),
            track_name: track.track_name.clone(),
            track_artist: track.track_artist.clone(),
            track_image: track.track_image.clone(),
        }
    }
}

/// Public view of a player; the song pool itself is never exposed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerView {
    pub identity: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_bot: bool,
    pub points: u32,
    /// Songs left in the player's pool.
    pub songs_remaining: usize,
}

impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            identity: player.identity.clone(),
            display_name: player.display_name.clone(),
            is_host: player.is_host,
            is_ready: player.is_ready,
            is_bot: player.is_bot,
            points: player.points,
            songs_remaining: player.song_pool.len(),
        }
    }
}

/// One line of the leaderboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    pub identity: String,
    pub display_name: String,
    pub points: u32,
}

impl From<&Player> for LeaderboardEntry {
    fn from(player: &Player) -> Self {
        Self {
            identity: player.identity.clone(),
            display_name: player.display_name.clone(),
            points: player.points,
        }
    }
}

/// Submission as visible in the current phase.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmissionView {
    pub player_id: String,
    /// Hidden while submissions are still open.
    pub track: Option<TrackView>,
    /// Vote tally, only once the round reached its results.
    pub votes: Option<usize>,
}

impl SubmissionView {
    /// Render a submission, hiding what the phase does not reveal yet.
    pub fn for_phase(submission: &Submission, phase: RoundPhase) -> Self {
        Self {
            player_id: submission.player_id.clone(),
            track: (phase != RoundPhase::Submission).then(|| TrackView::from(&submission.track)),
            votes: (phase == RoundPhase::Results).then(|| submission.votes.len()),
        }
    }
}

/// Detailed view of the round being played.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundView {
    pub number: u32,
    pub category: String,
    pub phase: RoundPhase,
    /// RFC 3339 timestamp at which the phase ends.
    pub phase_deadline: String,
    pub playback_index: Option<usize>,
    pub submissions: Vec<SubmissionView>,
}

impl From<&Round> for RoundView {
    fn from(round: &Round) -> Self {
        Self {
            number: round.number,
            category: round.category.clone(),
            phase: round.phase,
            phase_deadline: format_system_time(round.phase_deadline),
            playback_index: round.playback_index,
            submissions: round
                .submissions
                .iter()
                .map(|submission| SubmissionView::for_phase(submission, round.phase))
                .collect(),
        }
    }
}

/// Client-safe snapshot of a room broadcast after every change.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSnapshot {
    pub code: String,
    pub status: RoomStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    pub players: Vec<PlayerView>,
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Present once the game started.
    pub round: Option<RoundView>,
    pub version: u64,
}

impl From<&Room> for RoomSnapshot {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            status: room.status,
            current_round: room.current_round,
            total_rounds: room.total_rounds,
            players: room.players.values().map(PlayerView::from).collect(),
            leaderboard: leaderboard(room.players.values())
                .into_iter()
                .map(LeaderboardEntry::from)
                .collect(),
            round: room.current().map(RoundView::from),
            version: room.version,
        }
    }
}

/// Points earned by one submission at the end of a round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AwardView {
    pub player_id: String,
    pub track_id: String,
    pub votes: usize,
    pub rank: usize,
    pub points: u32,
}

impl From<&Award> for AwardView {
    fn from(award: &Award) -> Self {
        Self {
            player_id: award.player_id.clone(),
            track_id: award.track_id.clone(),
            votes: award.votes,
            rank: award.rank,
            points: award.points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::tests::room_in_phase;

    fn submitted_room(phase: RoundPhase) -> Room {
        let mut room = room_in_phase(RoundPhase::Submission);
        room.submit("host", "h1").unwrap();
        room.submit("p2", "a1").unwrap();
        room.current_mut().unwrap().phase = phase;
        room
    }

    #[test]
    fn tracks_hidden_while_submitting() {
        let snapshot = RoomSnapshot::from(&submitted_room(RoundPhase::Submission));
        let round = snapshot.round.unwrap();
        assert_eq!(round.submissions.len(), 2);
        assert!(round.submissions.iter().all(|s| s.track.is_none()));

        let json = serde_json::to_value(&round.submissions[0]).unwrap();
        assert!(json.get("track").is_none());
        assert!(json.get("votes").is_none());
    }

    #[test]
    fn tallies_only_revealed_in_results() {
        let mut room = submitted_room(RoundPhase::Voting);
        room.vote("p3", "host").unwrap();

        let voting = RoomSnapshot::from(&room).round.unwrap();
        assert!(voting.submissions[0].track.is_some());
        assert!(voting.submissions[0].votes.is_none());

        room.current_mut().unwrap().phase = RoundPhase::Results;
        let results = RoomSnapshot::from(&room).round.unwrap();
        assert_eq!(results.submissions[0].votes, Some(1));
    }

    #[test]
    fn snapshot_never_contains_song_pools() {
        let room = submitted_room(RoundPhase::Playback);
        let json = serde_json::to_string(&RoomSnapshot::from(&room)).unwrap();
        assert!(!json.contains("song_pool"));
        assert!(!json.contains("\"h2\""));
        assert!(json.contains("\"songs_remaining\":1"));
    }
}
