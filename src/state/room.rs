use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::{PlayerEntity, RoomEntity, RoundEntity, SubmissionEntity, TrackEntity},
    error::ServiceError,
};

/// Minimum number of players required before a room can leave the lobby.
pub const MIN_PLAYERS: usize = 2;

/// Lifecycle of a room as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Players are joining and marking themselves ready.
    Waiting,
    /// Rounds are being played.
    Playing,
    /// Every round has been scored.
    Completed,
}

/// The five stages a round goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// The round category is revealed.
    Category,
    /// Players pick a song from their pool.
    Submission,
    /// Submitted songs are played back one after the other.
    Playback,
    /// Players vote for their favourite submission.
    Voting,
    /// Points are awarded and the leaderboard is shown.
    Results,
}

impl RoundPhase {
    /// Stable snake_case name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Category => "category",
            RoundPhase::Submission => "submission",
            RoundPhase::Playback => "playback",
            RoundPhase::Voting => "voting",
            RoundPhase::Results => "results",
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule deciding who must have voted before the voting phase can end early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterEligibility {
    /// Every player with at least one submission from someone else must vote.
    #[default]
    AnyWithChoice,
    /// Vote total must reach `players - submissions`; never fires when that is zero.
    NonSubmitters,
}

/// Song metadata as exposed by the external catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Catalog identifier of the track.
    pub track_id: String,
    /// Song title.
    pub track_name: String,
    /// Performing artist.
    pub track_artist: String,
    /// Optional cover art URL.
    pub track_image: Option<String>,
}

/// Participant of a room, human or simulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Opaque identity supplied by the client (or generated for bots).
    pub identity: String,
    /// Name shown to the other players.
    pub display_name: String,
    /// Exactly one player per room is the host.
    pub is_host: bool,
    /// Whether the player confirmed their song pool.
    pub is_ready: bool,
    /// Whether the player is driven by the bot simulator.
    pub is_bot: bool,
    /// Running total; never decreases once play starts.
    pub points: u32,
    /// Songs still available for submission.
    pub song_pool: Vec<Track>,
}

impl Player {
    /// Build a human player that has not marked itself ready yet.
    pub fn human(identity: String, display_name: String, is_host: bool) -> Self {
        Self {
            identity,
            display_name,
            is_host,
            is_ready: false,
            is_bot: false,
            points: 0,
            song_pool: Vec::new(),
        }
    }

    /// Build a bot that is ready from the start with the given pool.
    pub fn bot(identity: String, display_name: String, song_pool: Vec<Track>) -> Self {
        Self {
            identity,
            display_name,
            is_host: false,
            is_ready: true,
            is_bot: true,
            points: 0,
            song_pool,
        }
    }
}

/// A player's song for the current round together with the votes it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Identity of the submitting player.
    pub player_id: String,
    /// Submitted song.
    pub track: Track,
    /// Identities of the players who voted for it, at most once each.
    pub votes: Vec<String>,
}

/// One category-to-results cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    /// 1-based round number.
    pub number: u32,
    /// Prompt players pick songs for.
    pub category: String,
    /// Current phase of the round.
    pub phase: RoundPhase,
    /// Absolute time at which the current phase expires.
    pub phase_deadline: SystemTime,
    /// Submissions in the order they were first made.
    pub submissions: Vec<Submission>,
    /// Index of the submission being played, only during playback.
    pub playback_index: Option<usize>,
    /// Set once points for this round have been awarded.
    pub scored: bool,
}

impl Round {
    /// Open a new round in the category phase.
    pub fn new(number: u32, category: String, phase_deadline: SystemTime) -> Self {
        Self {
            number,
            category,
            phase: RoundPhase::Category,
            phase_deadline,
            submissions: Vec::new(),
            playback_index: None,
            scored: false,
        }
    }

    /// Total number of votes cast in this round.
    pub fn vote_count(&self) -> usize {
        self.submissions.iter().map(|s| s.votes.len()).sum()
    }

    /// Find the submission made by `player_id`, if any.
    pub fn submission_of(&self, player_id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.player_id == player_id)
    }

    /// Whether `voter` already has a vote on any submission.
    pub fn has_voted(&self, voter: &str) -> bool {
        self.submissions
            .iter()
            .any(|s| s.votes.iter().any(|v| v == voter))
    }
}

/// Outcome of a join request on a waiting room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new player was appended.
    Joined,
    /// The identity was already present; only the name was refreshed.
    Rejoined,
}

/// Aggregate of one game session, owning its players and rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Six character join code.
    pub code: String,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Players keyed by identity, in join order.
    pub players: IndexMap<String, Player>,
    /// One category per round, already shuffled.
    pub categories: Vec<String>,
    /// Number of the round being played (0 in the lobby).
    pub current_round: u32,
    /// Number of rounds the room will play.
    pub total_rounds: u32,
    /// Rounds played so far; the last one is the current round.
    pub rounds: Vec<Round>,
    /// Set once bots joined; enables the bot simulator for this room.
    pub simulated: bool,
    /// Incremented on every durable mutation.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last durable mutation.
    pub updated_at: SystemTime,
}

impl Room {
    /// Create a lobby with the host as its only player.
    pub fn new(
        code: String,
        host_identity: String,
        host_name: String,
        categories: Vec<String>,
    ) -> Self {
        let now = SystemTime::now();
        let mut players = IndexMap::new();
        players.insert(
            host_identity.clone(),
            Player::human(host_identity, host_name, true),
        );

        Self {
            code,
            status: RoomStatus::Waiting,
            players,
            total_rounds: categories.len() as u32,
            categories,
            current_round: 0,
            rounds: Vec::new(),
            simulated: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Round currently being played, if the game started.
    pub fn current(&self) -> Option<&Round> {
        if self.current_round == 0 {
            return None;
        }
        self.rounds.last()
    }

    /// Mutable access to the current round.
    pub fn current_mut(&mut self) -> Option<&mut Round> {
        if self.current_round == 0 {
            return None;
        }
        self.rounds.last_mut()
    }

    /// Phase of the current round, if any.
    pub fn phase(&self) -> Option<RoundPhase> {
        self.current().map(|round| round.phase)
    }

    /// Identity of the host player.
    pub fn host(&self) -> Option<&Player> {
        self.players.values().find(|player| player.is_host)
    }

    /// Look up a player by identity.
    pub fn player(&self, identity: &str) -> Result<&Player, ServiceError> {
        self.players
            .get(identity)
            .ok_or_else(|| ServiceError::PlayerNotInRoom(identity.to_string()))
    }

    fn player_mut(&mut self, identity: &str) -> Result<&mut Player, ServiceError> {
        self.players
            .get_mut(identity)
            .ok_or_else(|| ServiceError::PlayerNotInRoom(identity.to_string()))
    }

    fn ensure_waiting(&self) -> Result<(), ServiceError> {
        if self.status != RoomStatus::Waiting {
            return Err(ServiceError::GameAlreadyInProgress(self.code.clone()));
        }
        Ok(())
    }

    /// Add a player to the lobby, or refresh the name of a returning one.
    pub fn join(&mut self, identity: &str, name: &str) -> Result<JoinOutcome, ServiceError> {
        self.ensure_waiting()?;

        if let Some(player) = self.players.get_mut(identity) {
            player.display_name = name.to_string();
            return Ok(JoinOutcome::Rejoined);
        }

        self.players.insert(
            identity.to_string(),
            Player::human(identity.to_string(), name.to_string(), false),
        );
        Ok(JoinOutcome::Joined)
    }

    /// Append simulated players and flag the room for bot simulation.
    pub fn add_bots(&mut self, bots: Vec<Player>) -> Result<(), ServiceError> {
        self.ensure_waiting()?;
        for bot in bots {
            self.players.insert(bot.identity.clone(), bot);
        }
        self.simulated = true;
        Ok(())
    }

    /// Replace the player's song pool and mark them ready.
    pub fn set_ready(&mut self, identity: &str, song_pool: Vec<Track>) -> Result<(), ServiceError> {
        self.ensure_waiting()?;
        let player = self.player_mut(identity)?;
        player.song_pool = song_pool;
        player.is_ready = true;
        Ok(())
    }

    /// Mark a player ready while keeping the pool they already have.
    pub fn confirm_ready(&mut self, identity: &str) -> Result<(), ServiceError> {
        self.ensure_waiting()?;
        self.player_mut(identity)?.is_ready = true;
        Ok(())
    }

    /// Mark a human ready on the pool already stored for them; an empty pool is rejected.
    pub fn ready_with_pool(&mut self, identity: &str) -> Result<(), ServiceError> {
        self.ensure_waiting()?;
        let player = self.player_mut(identity)?;
        if player.song_pool.is_empty() {
            return Err(ServiceError::InvalidInput(
                "songs are required while your pool is empty".into(),
            ));
        }
        player.is_ready = true;
        Ok(())
    }

    /// Number of players that marked themselves ready.
    pub fn ready_count(&self) -> usize {
        self.players.values().filter(|p| p.is_ready).count()
    }

    /// True when the lobby holds enough players and all of them are ready.
    pub fn ready_to_start(&self) -> bool {
        self.status == RoomStatus::Waiting
            && self.players.len() >= MIN_PLAYERS
            && self.players.values().all(|p| p.is_ready)
    }

    fn round_in_phase(&mut self, expected: RoundPhase) -> Result<&mut Round, ServiceError> {
        let actual = self.phase();
        if self.status != RoomStatus::Playing || actual != Some(expected) {
            return Err(ServiceError::WrongPhase { expected, actual });
        }
        self.current_mut()
            .ok_or(ServiceError::WrongPhase { expected, actual })
    }

    /// Record (or replace) the player's song for the current round.
    ///
    /// The track is taken out of the player's pool; a replaced track goes back into it.
    pub fn submit(&mut self, identity: &str, track_id: &str) -> Result<(), ServiceError> {
        self.round_in_phase(RoundPhase::Submission)?;

        let player = self.player_mut(identity)?;
        let position = player
            .song_pool
            .iter()
            .position(|track| track.track_id == track_id)
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!("track `{track_id}` is not in your song pool"))
            })?;
        let track = player.song_pool.remove(position);

        let round = self.round_in_phase(RoundPhase::Submission)?;
        let previous = match round
            .submissions
            .iter_mut()
            .find(|s| s.player_id == identity)
        {
            Some(existing) => Some(std::mem::replace(&mut existing.track, track)),
            None => {
                round.submissions.push(Submission {
                    player_id: identity.to_string(),
                    track,
                    votes: Vec::new(),
                });
                None
            }
        };

        if let Some(previous) = previous {
            self.player_mut(identity)?.song_pool.push(previous);
        }
        Ok(())
    }

    /// Cast `voter`'s vote for the submission of `target`, moving any earlier vote.
    pub fn vote(&mut self, voter: &str, target: &str) -> Result<(), ServiceError> {
        self.player(voter)?;
        let round = self.round_in_phase(RoundPhase::Voting)?;

        if voter == target {
            return Err(ServiceError::SelfVoteRejected);
        }
        if round.submission_of(target).is_none() {
            return Err(ServiceError::InvalidInput(format!(
                "player `{target}` has no submission this round"
            )));
        }

        for submission in round.submissions.iter_mut() {
            if submission.player_id == target {
                if !submission.votes.iter().any(|v| v == voter) {
                    submission.votes.push(voter.to_string());
                }
            } else {
                submission.votes.retain(|v| v != voter);
            }
        }
        Ok(())
    }

    /// True once every player has a submission in the current round.
    pub fn submissions_complete(&self) -> bool {
        self.current()
            .is_some_and(|round| round.submissions.len() == self.players.len())
    }

    /// Number of votes (or voters) required to end voting early under `policy`.
    pub fn eligible_voters(&self, policy: VoterEligibility) -> usize {
        let Some(round) = self.current() else {
            return 0;
        };
        match policy {
            VoterEligibility::AnyWithChoice => self
                .players
                .keys()
                .filter(|id| round.submissions.iter().any(|s| &s.player_id != *id))
                .count(),
            VoterEligibility::NonSubmitters => {
                self.players.len().saturating_sub(round.submissions.len())
            }
        }
    }

    /// Whether the voting phase may end before its deadline.
    pub fn voting_complete(&self, policy: VoterEligibility) -> bool {
        let Some(round) = self.current() else {
            return false;
        };
        let required = self.eligible_voters(policy);
        if required == 0 {
            return false;
        }
        match policy {
            VoterEligibility::AnyWithChoice => self
                .players
                .keys()
                .filter(|id| round.submissions.iter().any(|s| &s.player_id != *id))
                .all(|id| round.has_voted(id)),
            VoterEligibility::NonSubmitters => round.vote_count() >= required,
        }
    }
}

impl From<TrackEntity> for Track {
    fn from(value: TrackEntity) -> Self {
        Self {
            track_id: value.track_id,
            track_name: value.track_name,
            track_artist: value.track_artist,
            track_image: value.track_image,
        }
    }
}

impl From<Track> for TrackEntity {
    fn from(value: Track) -> Self {
        Self {
            track_id: value.track_id,
            track_name: value.track_name,
            track_artist: value.track_artist,
            track_image: value.track_image,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            identity: value.identity,
            display_name: value.display_name,
            is_host: value.is_host,
            is_ready: value.is_ready,
            is_bot: value.is_bot,
            points: value.points,
            song_pool: value.song_pool.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            identity: value.identity,
            display_name: value.display_name,
            is_host: value.is_host,
            is_ready: value.is_ready,
            is_bot: value.is_bot,
            points: value.points,
            song_pool: value.song_pool.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<SubmissionEntity> for Submission {
    fn from(value: SubmissionEntity) -> Self {
        Self {
            player_id: value.player_id,
            track: value.track.into(),
            votes: value.votes,
        }
    }
}

impl From<Submission> for SubmissionEntity {
    fn from(value: Submission) -> Self {
        Self {
            player_id: value.player_id,
            track: value.track.into(),
            votes: value.votes,
        }
    }
}

impl From<RoundEntity> for Round {
    fn from(value: RoundEntity) -> Self {
        Self {
            number: value.number,
            category: value.category,
            phase: value.phase,
            phase_deadline: value.phase_deadline,
            submissions: value.submissions.into_iter().map(Into::into).collect(),
            playback_index: None,
            scored: value.scored,
        }
    }
}

impl From<Round> for RoundEntity {
    fn from(value: Round) -> Self {
        Self {
            number: value.number,
            category: value.category,
            phase: value.phase,
            phase_deadline: value.phase_deadline,
            submissions: value.submissions.into_iter().map(Into::into).collect(),
            scored: value.scored,
        }
    }
}

impl From<RoomEntity> for Room {
    fn from(value: RoomEntity) -> Self {
        Self {
            code: value.code,
            status: value.status,
            players: value
                .players
                .into_iter()
                .map(|player| (player.identity.clone(), player.into()))
                .collect(),
            categories: value.categories,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            rounds: value.rounds.into_iter().map(Into::into).collect(),
            simulated: value.simulated,
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<Room> for RoomEntity {
    fn from(value: Room) -> Self {
        Self {
            code: value.code,
            status: value.status,
            players: value.players.into_values().map(Into::into).collect(),
            categories: value.categories,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            rounds: value.rounds.into_iter().map(Into::into).collect(),
            simulated: value.simulated,
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}
