use crate::state::room::{Player, Submission};

/// Points given to the most voted submission.
pub const FIRST_PLACE_POINTS: u32 = 3;
/// Points given to the runner-up, provided it received votes.
pub const SECOND_PLACE_POINTS: u32 = 2;
/// Points given to every other submission that received votes.
pub const PARTICIPATION_POINTS: u32 = 1;

/// Points a single submission earned at the end of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    /// Submitting player.
    pub player_id: String,
    /// Submitted track.
    pub track_id: String,
    /// Votes received.
    pub votes: usize,
    /// 0-based position in the round ranking.
    pub rank: usize,
    /// Points granted for that position.
    pub points: u32,
}

/// Rank the submissions of a round and compute the points each one earns.
///
/// Submissions are ordered by vote count, ties keeping submission order. The
/// first one always gets [`FIRST_PLACE_POINTS`], even without votes.
pub fn score_round(submissions: &[Submission]) -> Vec<Award> {
    let mut ranked: Vec<&Submission> = submissions.iter().collect();
    // sort_by is stable: equal counts keep their submission order.
    ranked.sort_by(|a, b| b.votes.len().cmp(&a.votes.len()));

    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, submission)| {
            let votes = submission.votes.len();
            let points = match rank {
                0 => FIRST_PLACE_POINTS,
                1 if votes > 0 => SECOND_PLACE_POINTS,
                _ if votes > 0 => PARTICIPATION_POINTS,
                _ => 0,
            };
            Award {
                player_id: submission.player_id.clone(),
                track_id: submission.track.track_id.clone(),
                votes,
                rank,
                points,
            }
        })
        .collect()
}

/// Players ordered by points, highest first; ties keep join order.
pub fn leaderboard<'a>(players: impl IntoIterator<Item = &'a Player>) -> Vec<&'a Player> {
    let mut ordered: Vec<&Player> = players.into_iter().collect();
    ordered.sort_by(|a, b| b.points.cmp(&a.points));
    ordered
}
