//! Simulated players: roster, song pools and the random choices they make.

use std::time::Duration;

use rand::{
    Rng,
    seq::{IndexedRandom, IteratorRandom},
};
use uuid::Uuid;

use crate::{
    config::{BotSettings, DelayRange},
    state::room::{Player, Room, RoundPhase},
};

/// Prefix of every bot identity.
pub const BOT_ID_PREFIX: &str = "bot-";

/// Build `count` ready bots with distinct identities, roster names and song pools.
///
/// Names continue after the bots already present in `room`; once the roster is
/// exhausted a numeric suffix keeps them distinct.
pub fn make_bots<R: Rng + ?Sized>(
    settings: &BotSettings,
    room: &Room,
    count: usize,
    rng: &mut R,
) -> Vec<Player> {
    let existing = room.players.values().filter(|p| p.is_bot).count();
    let roster_len = settings.roster.len().max(1);

    (existing..existing + count)
        .map(|slot| {
            let base = settings
                .roster
                .get(slot % roster_len)
                .cloned()
                .unwrap_or_else(|| "Bot".to_string());
            let name = match slot / roster_len {
                0 => base,
                lap => format!("{base} {}", lap + 1),
            };
            let pool = settings
                .catalog
                .choose_multiple(&mut *rng, settings.songs_per_bot)
                .cloned()
                .collect();
            Player::bot(
                format!("{BOT_ID_PREFIX}{}", Uuid::new_v4().simple()),
                name,
                pool,
            )
        })
        .collect()
}

/// Track a bot submits this round, if it still has songs and has not submitted.
pub fn pick_submission<R: Rng + ?Sized>(room: &Room, bot: &str, rng: &mut R) -> Option<String> {
    let round = room.current()?;
    if round.phase != RoundPhase::Submission || round.submission_of(bot).is_some() {
        return None;
    }
    let player = room.players.get(bot)?;
    player
        .song_pool
        .choose(rng)
        .map(|track| track.track_id.clone())
}

/// Player a bot votes for: any other submission, never twice in a round.
pub fn pick_vote<R: Rng + ?Sized>(room: &Room, bot: &str, rng: &mut R) -> Option<String> {
    let round = room.current()?;
    if round.phase != RoundPhase::Voting || round.has_voted(bot) {
        return None;
    }
    round
        .submissions
        .iter()
        .filter(|submission| submission.player_id != bot)
        .choose(rng)
        .map(|submission| submission.player_id.clone())
}

/// Sample a reaction time from `range`.
pub fn sample_delay<R: Rng + ?Sized>(range: DelayRange, rng: &mut R) -> Duration {
    let min = range.min.as_millis() as u64;
    let max = range.max.as_millis() as u64;
    Duration::from_millis(rng.random_range(min..=max))
}

/// Identities of the bots of `room`, in join order.
pub fn bot_ids(room: &Room) -> Vec<String> {
    room.players
        .values()
        .filter(|p| p.is_bot)
        .map(|p| p.identity.clone())
        .collect()
}
