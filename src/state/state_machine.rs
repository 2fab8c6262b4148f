use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::PhaseTimings,
    state::{
        room::{MIN_PLAYERS, Room, RoomStatus, Round, RoundPhase},
        scoring::{Award, score_round},
    },
};

/// High-level position of a room in its game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Players are still gathering in the lobby.
    Lobby,
    /// A round is being played.
    Round {
        /// 1-based round number.
        number: u32,
        /// Phase of that round.
        phase: RoundPhase,
    },
    /// The last round was scored; nothing else will happen.
    Finished,
}

impl GamePhase {
    /// Derive the phase a room is currently in.
    pub fn of(room: &Room) -> Self {
        match room.status {
            RoomStatus::Waiting => GamePhase::Lobby,
            RoomStatus::Completed => GamePhase::Finished,
            RoomStatus::Playing => match room.current() {
                Some(round) => GamePhase::Round {
                    number: round.number,
                    phase: round.phase,
                },
                None => GamePhase::Lobby,
            },
        }
    }
}

/// Events that can move a room forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Every player in the lobby is ready.
    AllReady,
    /// The host forces the game to start with the ready players.
    ForceStart,
    /// The deadline of the current phase passed.
    PhaseExpired,
    /// Every player submitted a song.
    SubmissionsComplete,
    /// The last submitted song finished playing.
    PlaybackFinished,
    /// Every eligible voter voted.
    VotesComplete,
}

/// Error returned when an event cannot be applied from a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the room was in when the event was received.
    pub from: GamePhase,
    /// The rejected event.
    pub event: PhaseEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
    /// The lobby does not hold enough ready players to start.
    NotReady {
        /// Ready players.
        ready: usize,
        /// Players in the lobby.
        players: usize,
    },
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The room moved to another phase since the plan was created.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// The room was written since the plan was created.
    VersionMismatch {
        /// Version the plan would produce.
        expected: u64,
        /// Version applying now would produce.
        actual: u64,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan, used to correlate logs.
    pub id: PlanId,
    /// Phase the room is in.
    pub from: GamePhase,
    /// Phase the room will be in once applied.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: PhaseEvent,
    /// Room version after applying this transition.
    pub version_next: u64,
}

/// Outcome of an applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase the room entered.
    pub phase: GamePhase,
    /// Points awarded when the transition entered results, empty otherwise.
    pub awards: Vec<Award>,
}

/// Computes and applies round transitions using the configured phase durations.
#[derive(Debug, Clone)]
pub struct RoomStateMachine {
    timings: PhaseTimings,
}

impl RoomStateMachine {
    /// Build a state machine using the given phase durations.
    pub fn new(timings: PhaseTimings) -> Self {
        Self { timings }
    }

    /// Phase durations in use.
    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    /// Validate that `event` can be applied to `room` and describe the result.
    pub fn plan(&self, room: &Room, event: PhaseEvent) -> Result<Plan, PlanError> {
        let from = GamePhase::of(room);
        let to = self.compute_transition(room, from, event)?;

        Ok(Plan {
            id: Uuid::new_v4(),
            from,
            to,
            event,
            version_next: room.version + 1,
        })
    }

    /// Apply a plan to `room`, stamping deadlines relative to `now`.
    ///
    /// Callers apply to a copy and only keep it once it was persisted.
    pub fn apply(
        &self,
        room: &mut Room,
        plan: &Plan,
        now: SystemTime,
    ) -> Result<Transition, ApplyError> {
        let actual = GamePhase::of(room);
        if actual != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual,
            });
        }
        if room.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: room.version + 1,
            });
        }

        let mut awards = Vec::new();
        match plan.to {
            GamePhase::Round {
                number,
                phase: RoundPhase::Category,
            } => {
                let category = room
                    .categories
                    .get(number as usize - 1)
                    .cloned()
                    .unwrap_or_default();
                room.status = RoomStatus::Playing;
                room.current_round = number;
                room.rounds.push(Round::new(
                    number,
                    category,
                    now + self.timings.category,
                ));
            }
            GamePhase::Round { phase, .. } if phase != RoundPhase::Results => {
                let duration = self.phase_duration(room, phase);
                if let Some(round) = room.current_mut() {
                    round.phase = phase;
                    round.phase_deadline = now + duration;
                    round.playback_index = (phase == RoundPhase::Playback).then_some(0);
                }
            }
            GamePhase::Round { .. } | GamePhase::Finished => {
                awards = self.enter_results(room, now);
                if plan.to == GamePhase::Finished {
                    room.status = RoomStatus::Completed;
                }
            }
            GamePhase::Lobby => {}
        }

        room.version = plan.version_next;
        room.updated_at = now;

        Ok(Transition {
            phase: plan.to,
            awards,
        })
    }

    fn phase_duration(&self, room: &Room, phase: RoundPhase) -> std::time::Duration {
        let submissions = room.current().map_or(0, |round| round.submissions.len());
        self.timings.duration(phase, submissions)
    }

    /// Switch the current round to results and award points exactly once.
    fn enter_results(&self, room: &mut Room, now: SystemTime) -> Vec<Award> {
        let results = self.timings.results;
        let Some(round) = room.current_mut() else {
            return Vec::new();
        };
        round.phase = RoundPhase::Results;
        round.phase_deadline = now + results;
        round.playback_index = None;
        if round.scored {
            return Vec::new();
        }
        round.scored = true;

        let awards = score_round(&round.submissions);
        for award in &awards {
            if let Some(player) = room.players.get_mut(&award.player_id) {
                player.points += award.points;
            }
        }
        awards
    }

    fn compute_transition(
        &self,
        room: &Room,
        from: GamePhase,
        event: PhaseEvent,
    ) -> Result<GamePhase, PlanError> {
        let invalid = || PlanError::InvalidTransition(InvalidTransition { from, event });

        let next = match (from, event) {
            (GamePhase::Lobby, PhaseEvent::AllReady) => {
                if !room.ready_to_start() {
                    return Err(PlanError::NotReady {
                        ready: room.ready_count(),
                        players: room.players.len(),
                    });
                }
                first_round()
            }
            (GamePhase::Lobby, PhaseEvent::ForceStart) => {
                if room.ready_count() < MIN_PLAYERS {
                    return Err(PlanError::NotReady {
                        ready: room.ready_count(),
                        players: room.players.len(),
                    });
                }
                first_round()
            }
            (
                GamePhase::Round {
                    number,
                    phase: RoundPhase::Category,
                },
                PhaseEvent::PhaseExpired,
            ) => GamePhase::Round {
                number,
                phase: RoundPhase::Submission,
            },
            (
                GamePhase::Round {
                    number,
                    phase: RoundPhase::Submission,
                },
                PhaseEvent::PhaseExpired | PhaseEvent::SubmissionsComplete,
            ) => {
                let has_submissions = room
                    .current()
                    .is_some_and(|round| !round.submissions.is_empty());
                GamePhase::Round {
                    number,
                    phase: if has_submissions {
                        RoundPhase::Playback
                    } else {
                        RoundPhase::Voting
                    },
                }
            }
            (
                GamePhase::Round {
                    number,
                    phase: RoundPhase::Playback,
                },
                PhaseEvent::PhaseExpired | PhaseEvent::PlaybackFinished,
            ) => GamePhase::Round {
                number,
                phase: RoundPhase::Voting,
            },
            (
                GamePhase::Round {
                    number,
                    phase: RoundPhase::Voting,
                },
                PhaseEvent::PhaseExpired | PhaseEvent::VotesComplete,
            ) => {
                if number >= room.total_rounds {
                    GamePhase::Finished
                } else {
                    GamePhase::Round {
                        number,
                        phase: RoundPhase::Results,
                    }
                }
            }
            (
                GamePhase::Round {
                    number,
                    phase: RoundPhase::Results,
                },
                PhaseEvent::PhaseExpired,
            ) if number < room.total_rounds => GamePhase::Round {
                number: number + 1,
                phase: RoundPhase::Category,
            },
            _ => return Err(invalid()),
        };

        Ok(next)
    }
}

fn first_round() -> GamePhase {
    GamePhase::Round {
        number: 1,
        phase: RoundPhase::Category,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::room::tests::pool;

    fn machine() -> RoomStateMachine {
        RoomStateMachine::new(PhaseTimings::default())
    }

    fn ready_lobby(rounds: usize) -> Room {
        let categories = (1..=rounds).map(|i| format!("Category {i}")).collect();
        let mut room = Room::new("ABC234".into(), "host".into(), "Host".into(), categories);
        room.join("p2", "Two").unwrap();
        room.set_ready("host", pool(&["h1", "h2", "h3"])).unwrap();
        room.set_ready("p2", pool(&["a1", "a2", "a3"])).unwrap();
        room
    }

    fn step(sm: &RoomStateMachine, room: &mut Room, event: PhaseEvent) -> Transition {
        let plan = sm.plan(room, event).unwrap();
        let transition = sm.apply(room, &plan, SystemTime::now()).unwrap();
        assert_eq!(
            room.rounds.len() as u32,
            room.current_round.min(room.total_rounds)
        );
        transition
    }

    fn round(number: u32, phase: RoundPhase) -> GamePhase {
        GamePhase::Round { number, phase }
    }

    #[test]
    fn lobby_is_initial_phase() {
        let room = ready_lobby(1);
        assert_eq!(GamePhase::of(&room), GamePhase::Lobby);
    }

    #[test]
    fn all_ready_starts_first_round() {
        let sm = machine();
        let mut room = ready_lobby(2);
        let now = SystemTime::now();
        let plan = sm.plan(&room, PhaseEvent::AllReady).unwrap();
        sm.apply(&mut room, &plan, now).unwrap();

        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.current_round, 1);
        assert_eq!(room.version, 1);
        let current = room.current().unwrap();
        assert_eq!(current.category, "Category 1");
        assert_eq!(current.phase_deadline, now + Duration::from_secs(10));
    }

    #[test]
    fn start_requires_everyone_ready() {
        let sm = machine();
        let mut room = ready_lobby(1);
        room.join("p3", "Three").unwrap();
        let err = sm.plan(&room, PhaseEvent::AllReady).unwrap_err();
        assert_eq!(
            err,
            PlanError::NotReady {
                ready: 2,
                players: 3
            }
        );

        // force start only needs two ready players
        assert!(sm.plan(&room, PhaseEvent::ForceStart).is_ok());
    }

    #[test]
    fn empty_submission_phase_skips_playback() {
        let sm = machine();
        let mut room = ready_lobby(1);
        step(&sm, &mut room, PhaseEvent::AllReady);
        step(&sm, &mut room, PhaseEvent::PhaseExpired);

        let transition = step(&sm, &mut room, PhaseEvent::PhaseExpired);
        assert_eq!(transition.phase, round(1, RoundPhase::Voting));
    }

    #[test]
    fn playback_duration_scales_with_submissions() {
        let sm = machine();
        let mut room = ready_lobby(1);
        step(&sm, &mut room, PhaseEvent::AllReady);
        step(&sm, &mut room, PhaseEvent::PhaseExpired);
        room.submit("host", "h1").unwrap();
        room.submit("p2", "a1").unwrap();

        let now = SystemTime::now();
        let plan = sm.plan(&room, PhaseEvent::SubmissionsComplete).unwrap();
        sm.apply(&mut room, &plan, now).unwrap();
        let current = room.current().unwrap();
        assert_eq!(current.phase, RoundPhase::Playback);
        assert_eq!(current.playback_index, Some(0));
        assert_eq!(current.phase_deadline, now + Duration::from_secs(20));
    }

    #[test]
    fn full_game_scores_each_round_once() {
        let sm = machine();
        let mut room = ready_lobby(2);
        step(&sm, &mut room, PhaseEvent::AllReady);

        for number in 1..=2 {
            assert_eq!(GamePhase::of(&room), round(number, RoundPhase::Category));
            step(&sm, &mut room, PhaseEvent::PhaseExpired);
            room.submit("host", &format!("h{number}")).unwrap();
            room.submit("p2", &format!("a{number}")).unwrap();
            step(&sm, &mut room, PhaseEvent::SubmissionsComplete);
            step(&sm, &mut room, PhaseEvent::PlaybackFinished);
            room.vote("host", "p2").unwrap();
            room.vote("p2", "host").unwrap();

            let transition = step(&sm, &mut room, PhaseEvent::VotesComplete);
            assert_eq!(transition.awards.len(), 2);
            if number == 1 {
                assert_eq!(transition.phase, round(1, RoundPhase::Results));
                step(&sm, &mut room, PhaseEvent::PhaseExpired);
            } else {
                assert_eq!(transition.phase, GamePhase::Finished);
            }
        }

        assert_eq!(room.status, RoomStatus::Completed);
        assert_eq!(room.rounds.len(), 2);
        assert!(room.rounds.iter().all(|r| r.scored));
        // 1-1 ties: the earlier submission (host) wins each round
        assert_eq!(room.player("host").unwrap().points, 6);
        assert_eq!(room.player("p2").unwrap().points, 4);
    }

    #[test]
    fn finished_room_accepts_nothing() {
        let sm = machine();
        let mut room = ready_lobby(1);
        step(&sm, &mut room, PhaseEvent::AllReady);
        step(&sm, &mut room, PhaseEvent::PhaseExpired);
        step(&sm, &mut room, PhaseEvent::PhaseExpired);
        step(&sm, &mut room, PhaseEvent::PhaseExpired);

        let err = sm.plan(&room, PhaseEvent::PhaseExpired).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: GamePhase::Finished,
                event: PhaseEvent::PhaseExpired,
            })
        );
    }

    #[test]
    fn early_completion_events_are_phase_specific() {
        let sm = machine();
        let mut room = ready_lobby(1);
        step(&sm, &mut room, PhaseEvent::AllReady);
        let err = sm.plan(&room, PhaseEvent::VotesComplete).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn stale_plan_is_rejected() {
        let sm = machine();
        let mut room = ready_lobby(1);
        let plan = sm.plan(&room, PhaseEvent::AllReady).unwrap();
        step(&sm, &mut room, PhaseEvent::AllReady);

        let err = sm.apply(&mut room, &plan, SystemTime::now()).unwrap_err();
        assert!(matches!(err, ApplyError::PhaseMismatch { .. }));
    }
}
