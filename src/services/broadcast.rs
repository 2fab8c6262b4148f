use tracing::debug;

use crate::{
    dto::{
        room::{AwardView, LeaderboardEntry, RoomSnapshot, SubmissionView},
        ws::ServerMessage,
    },
    state::{
        ConnectionRegistry,
        room::Room,
        scoring::{Award, leaderboard},
    },
};

/// Snapshot message describing `room` as clients may see it.
pub fn snapshot_message(room: &Room) -> ServerMessage {
    ServerMessage::RoomSnapshot {
        room: RoomSnapshot::from(room),
    }
}

/// Broadcast the current snapshot of `room` to its connections.
pub fn room_snapshot(connections: &ConnectionRegistry, room: &Room) {
    connections.broadcast_room(&room.code, &snapshot_message(room));
}

/// Announce the submission currently playing.
pub fn now_playing(connections: &ConnectionRegistry, room: &Room) {
    let Some(round) = room.current() else {
        return;
    };
    let Some(index) = round.playback_index else {
        return;
    };
    let Some(submission) = round.submissions.get(index) else {
        debug!(room = %room.code, index, "playback index past the last submission");
        return;
    };

    connections.broadcast_room(
        &room.code,
        &ServerMessage::NowPlaying {
            round: round.number,
            index,
            submission: SubmissionView::for_phase(submission, round.phase),
        },
    );
}

/// Publish the awards of the round that was just scored together with the leaderboard.
pub fn round_results(connections: &ConnectionRegistry, room: &Room, awards: &[Award]) {
    let Some(round) = room.current() else {
        return;
    };
    connections.broadcast_room(
        &room.code,
        &ServerMessage::RoundResults {
            round: round.number,
            awards: awards.iter().map(AwardView::from).collect(),
            leaderboard: leaderboard(room.players.values())
                .into_iter()
                .map(LeaderboardEntry::from)
                .collect(),
        },
    );
}
