//! Single-writer task owning one room: every mutation, timer firing and bot action
//! of a room is serialized through its mailbox.

use std::time::{Duration, SystemTime};

use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, sleep},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    error::ServiceError,
    services::{bots, broadcast},
    state::{
        SharedState,
        room::{Room, RoomStatus, RoundPhase, Track},
        state_machine::{GamePhase, PhaseEvent, Transition},
    },
};

/// Longest pause between two abandonment checks.
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(30);
const MIN_IDLE_CHECK_PERIOD: Duration = Duration::from_millis(100);

/// Player actions routed to a room.
#[derive(Debug, Clone)]
pub enum PlayerIntent {
    /// Enter the lobby, or refresh the name of a known player.
    Join { identity: String, name: String },
    /// Check that `identity` belongs to the room; nothing is written.
    Resume { identity: String },
    /// Mark ready, replacing the pool when songs are given.
    Ready {
        identity: String,
        songs: Option<Vec<Track>>,
    },
    /// Submit a song for the current round.
    Submit { identity: String, track_id: String },
    /// Vote for `target`'s submission.
    Vote { identity: String, target: String },
    /// Add simulated players on behalf of `identity`.
    AddBots { identity: String, count: usize },
    /// Force the next phase (host only, test mode).
    Advance { identity: String },
}

/// Commands processed by a room actor, one at a time.
#[derive(Debug)]
pub enum RoomCommand {
    /// A player action awaiting its outcome.
    Intent {
        intent: PlayerIntent,
        reply: oneshot::Sender<Result<Room, ServiceError>>,
    },
    /// Read the current room.
    Snapshot { reply: oneshot::Sender<Room> },
    /// The deadline of `phase` in `round` passed.
    PhaseExpired { round: u32, phase: RoundPhase },
    /// The song before `index` finished playing.
    PlaybackTick { round: u32, index: usize },
    /// A bot is due to submit.
    BotSubmit { bot: String, round: u32 },
    /// A bot is due to vote.
    BotVote { bot: String, round: u32 },
    /// Mark the player who summoned bots as ready.
    BotReady { identity: String },
    /// Stop the actor.
    Shutdown,
}

/// The room actor is gone; the command was not processed.
#[derive(Debug, Error)]
#[error("room actor stopped")]
pub struct ActorStopped;

/// Cloneable address of a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    id: Uuid,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Identifier distinguishing successive actors of the same room.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the actor behind this handle stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a player intent and wait for its outcome.
    pub async fn request(
        &self,
        intent: PlayerIntent,
    ) -> Result<Result<Room, ServiceError>, ActorStopped> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Intent { intent, reply })
            .await
            .map_err(|_| ActorStopped)?;
        rx.await.map_err(|_| ActorStopped)
    }

    /// Fetch the room as the actor currently holds it.
    pub async fn snapshot(&self) -> Result<Room, ActorStopped> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Snapshot { reply })
            .await
            .map_err(|_| ActorStopped)?;
        rx.await.map_err(|_| ActorStopped)
    }

    /// Ask the actor to stop; pending timers are cancelled.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(RoomCommand::Shutdown);
    }
}

/// Start the actor owning `room` and return its handle.
pub fn spawn(state: SharedState, room: Room) -> RoomHandle {
    let (tx, inbox) = mpsc::channel(state.config().mailbox_capacity);
    let id = Uuid::new_v4();
    let actor = RoomActor {
        id,
        mailbox: tx.downgrade(),
        inbox,
        state,
        room,
        timer: None,
        bot_tasks: Vec::new(),
        stalled: false,
        last_activity: Instant::now(),
        rng: StdRng::from_os_rng(),
    };
    tokio::spawn(actor.run());
    RoomHandle { id, tx }
}

struct RoomActor {
    id: Uuid,
    mailbox: mpsc::WeakSender<RoomCommand>,
    inbox: mpsc::Receiver<RoomCommand>,
    state: SharedState,
    room: Room,
    /// Phase expiry or playback tick; at most one is armed.
    timer: Option<JoinHandle<()>>,
    bot_tasks: Vec<JoinHandle<()>>,
    /// A timer-driven transition failed and must be retried.
    stalled: bool,
    last_activity: Instant,
    rng: StdRng,
}

impl RoomActor {
    async fn run(mut self) {
        info!(room = %self.room.code, version = self.room.version, "room actor started");
        self.resume_timers();

        let period = self
            .state
            .config()
            .abandon_after
            .min(IDLE_CHECK_PERIOD)
            .max(MIN_IDLE_CHECK_PERIOD);
        let mut idle_check = interval(period);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        idle_check.tick().await;

        loop {
            tokio::select! {
                command = self.inbox.recv() => {
                    match command {
                        None | Some(RoomCommand::Shutdown) => break,
                        Some(command) => {
                            self.retry_stalled().await;
                            self.handle(command).await;
                        }
                    }
                }
                _ = idle_check.tick() => {
                    if self.is_abandoned() {
                        info!(room = %self.room.code, "room abandoned; unloading");
                        break;
                    }
                }
            }
        }

        self.stop();
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Intent { intent, reply } => {
                self.last_activity = Instant::now();
                match self.apply_intent(intent).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(self.room.clone()));
                        self.check_early_completion().await;
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.clone());
            }
            RoomCommand::PhaseExpired { round, phase } => {
                if !self.is_current(round, phase) {
                    debug!(room = %self.room.code, round, phase = %phase, "stale timer ignored");
                    return;
                }
                self.timed_transition(PhaseEvent::PhaseExpired).await;
            }
            RoomCommand::PlaybackTick { round, index } => self.playback_tick(round, index).await,
            RoomCommand::BotSubmit { bot, round } => self.bot_submit(bot, round).await,
            RoomCommand::BotVote { bot, round } => self.bot_vote(bot, round).await,
            RoomCommand::BotReady { identity } => self.bot_ready(identity).await,
            RoomCommand::Shutdown => {}
        }
    }

    async fn apply_intent(&mut self, intent: PlayerIntent) -> Result<(), ServiceError> {
        match intent {
            PlayerIntent::Join { identity, name } => {
                self.mutate(|room| room.join(&identity, &name).map(|_| ()))
                    .await
            }
            PlayerIntent::Resume { identity } => self.room.player(&identity).map(|_| ()),
            PlayerIntent::Ready { identity, songs } => {
                self.mutate(|room| match songs {
                    Some(songs) => room.set_ready(&identity, songs),
                    None => room.ready_with_pool(&identity),
                })
                .await
            }
            PlayerIntent::Submit { identity, track_id } => {
                self.mutate(|room| room.submit(&identity, &track_id)).await
            }
            PlayerIntent::Vote { identity, target } => {
                self.mutate(|room| room.vote(&identity, &target)).await
            }
            PlayerIntent::AddBots { identity, count } => {
                self.room.player(&identity)?;
                let config = self.state.config();
                let new_bots = bots::make_bots(&config.bots, &self.room, count, &mut self.rng);
                self.mutate(|room| room.add_bots(new_bots)).await?;
                info!(room = %self.room.code, count, "bots added");
                let command = RoomCommand::BotReady { identity };
                self.spawn_bot_task(config.bots.ready_delay, command);
                Ok(())
            }
            PlayerIntent::Advance { identity } => self.advance(&identity).await,
        }
    }

    /// Apply a player-level change to a copy of the room, persist it, then publish it.
    async fn mutate<F>(&mut self, change: F) -> Result<(), ServiceError>
    where
        F: FnOnce(&mut Room) -> Result<(), ServiceError>,
    {
        let mut next = self.room.clone();
        change(&mut next)?;
        next.version = self.room.version + 1;
        next.updated_at = SystemTime::now();
        self.commit(next).await?;
        broadcast::room_snapshot(self.state.connections(), &self.room);
        Ok(())
    }

    /// Persist `next` against the current version and adopt it on success.
    async fn commit(&mut self, next: Room) -> Result<(), ServiceError> {
        let store = self.state.require_room_store().await?;
        match store.update_room(next.clone().into(), self.room.version).await {
            Ok(()) => {
                self.room = next;
                Ok(())
            }
            Err(StorageError::Conflict { code }) => {
                warn!(room = %code, version = self.room.version, "room written elsewhere; reloading");
                match store.find_room(code.clone()).await {
                    Ok(Some(entity)) => {
                        self.room = entity.into();
                        self.resume_timers();
                    }
                    Ok(None) => warn!(room = %code, "room vanished from storage"),
                    Err(err) => warn!(room = %code, error = %err, "failed to reload room"),
                }
                Err(ServiceError::InvalidState(
                    "room changed concurrently; retry the action".into(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Plan, apply, persist and announce a phase transition.
    async fn transition(&mut self, event: PhaseEvent) -> Result<(), ServiceError> {
        let state = self.state.clone();
        let machine = state.machine();
        let plan = machine.plan(&self.room, event)?;

        let mut next = self.room.clone();
        let transition = machine.apply(&mut next, &plan, SystemTime::now())?;

        if let Err(err) = self.commit(next).await {
            error!(
                room = %self.room.code,
                plan_id = %plan.id,
                event = ?event,
                error = %err,
                "failed to persist transition"
            );
            return Err(err);
        }

        info!(
            room = %self.room.code,
            from = ?plan.from,
            to = ?plan.to,
            event = ?event,
            version = self.room.version,
            "phase transition"
        );
        self.enter(transition);
        Ok(())
    }

    /// Transition triggered by a timer; on failure the expiry is retried by the next command.
    async fn timed_transition(&mut self, event: PhaseEvent) {
        let version = self.room.version;
        if let Err(err) = self.transition(event).await {
            if self.room.version != version {
                // a conflict reloaded the room and armed its own timers
                debug!(room = %self.room.code, error = %err, "timed transition superseded by a newer room");
                return;
            }
            warn!(room = %self.room.code, error = %err, "timed transition failed; will retry");
            self.stalled = true;
        }
    }

    async fn retry_stalled(&mut self) {
        if !self.stalled {
            return;
        }
        self.stalled = false;
        if self.room.status != RoomStatus::Playing {
            return;
        }
        info!(room = %self.room.code, "retrying stalled phase expiry");
        self.timed_transition(PhaseEvent::PhaseExpired).await;
    }

    async fn check_early_completion(&mut self) {
        let policy = self.state.config().voter_eligibility;
        let event = match GamePhase::of(&self.room) {
            GamePhase::Lobby if self.room.ready_to_start() => PhaseEvent::AllReady,
            GamePhase::Round {
                phase: RoundPhase::Submission,
                ..
            } if self.room.submissions_complete() => PhaseEvent::SubmissionsComplete,
            GamePhase::Round {
                phase: RoundPhase::Voting,
                ..
            } if self.room.voting_complete(policy) => PhaseEvent::VotesComplete,
            _ => return,
        };

        if let Err(err) = self.transition(event).await {
            warn!(room = %self.room.code, event = ?event, error = %err, "early transition failed");
        }
    }

    async fn advance(&mut self, identity: &str) -> Result<(), ServiceError> {
        if !self.state.config().allow_manual_advance {
            return Err(ServiceError::Unauthorized(
                "manual advance is disabled".into(),
            ));
        }
        if !self.room.player(identity)?.is_host {
            return Err(ServiceError::Unauthorized(
                "only the host can advance the game".into(),
            ));
        }

        let event = match GamePhase::of(&self.room) {
            GamePhase::Lobby => PhaseEvent::ForceStart,
            GamePhase::Round { .. } => PhaseEvent::PhaseExpired,
            GamePhase::Finished => {
                return Err(ServiceError::InvalidState("game already completed".into()));
            }
        };
        self.transition(event).await
    }

    /// Side effects of entering a phase: timers, bots and announcements.
    fn enter(&mut self, transition: Transition) {
        self.cancel_timers();
        let connections = self.state.connections();
        broadcast::room_snapshot(connections, &self.room);

        let GamePhase::Round { number, phase } = transition.phase else {
            if transition.phase == GamePhase::Finished {
                broadcast::round_results(connections, &self.room, &transition.awards);
                info!(room = %self.room.code, "game completed");
            }
            return;
        };

        let timings = self.state.machine().timings().clone();
        match phase {
            RoundPhase::Category | RoundPhase::Submission | RoundPhase::Voting => {
                let submissions = self
                    .room
                    .current()
                    .map_or(0, |round| round.submissions.len());
                self.arm(
                    timings.duration(phase, submissions),
                    RoomCommand::PhaseExpired {
                        round: number,
                        phase,
                    },
                );
                match phase {
                    RoundPhase::Submission => self.schedule_bot_submissions(number),
                    RoundPhase::Voting => self.schedule_bot_votes(number),
                    _ => {}
                }
            }
            RoundPhase::Playback => {
                broadcast::now_playing(connections, &self.room);
                self.arm(
                    timings.playback_per_song,
                    RoomCommand::PlaybackTick {
                        round: number,
                        index: 1,
                    },
                );
            }
            RoundPhase::Results => {
                broadcast::round_results(connections, &self.room, &transition.awards);
                self.arm(
                    timings.results,
                    RoomCommand::PhaseExpired {
                        round: number,
                        phase,
                    },
                );
            }
        }
    }

    async fn playback_tick(&mut self, round: u32, index: usize) {
        if !self.is_current(round, RoundPhase::Playback) {
            debug!(room = %self.room.code, round, index, "stale playback tick ignored");
            return;
        }

        let total = self
            .room
            .current()
            .map_or(0, |current| current.submissions.len());
        if index >= total {
            self.timed_transition(PhaseEvent::PlaybackFinished).await;
            return;
        }

        // playback progress lives in memory only
        if let Some(current) = self.room.current_mut() {
            current.playback_index = Some(index);
        }
        broadcast::now_playing(self.state.connections(), &self.room);
        let per_song = self.state.machine().timings().playback_per_song;
        self.arm(
            per_song,
            RoomCommand::PlaybackTick {
                round,
                index: index + 1,
            },
        );
    }

    async fn bot_submit(&mut self, bot: String, round: u32) {
        if !self.is_current(round, RoundPhase::Submission) {
            return;
        }
        let Some(track_id) = bots::pick_submission(&self.room, &bot, &mut self.rng) else {
            return;
        };
        match self.mutate(|room| room.submit(&bot, &track_id)).await {
            Ok(()) => {
                debug!(room = %self.room.code, bot = %bot, track = %track_id, "bot submitted");
                self.check_early_completion().await;
            }
            Err(err) => warn!(room = %self.room.code, bot = %bot, error = %err, "bot submission failed"),
        }
    }

    async fn bot_vote(&mut self, bot: String, round: u32) {
        if !self.is_current(round, RoundPhase::Voting) {
            return;
        }
        let Some(target) = bots::pick_vote(&self.room, &bot, &mut self.rng) else {
            return;
        };
        match self.mutate(|room| room.vote(&bot, &target)).await {
            Ok(()) => {
                debug!(room = %self.room.code, bot = %bot, target = %target, "bot voted");
                self.check_early_completion().await;
            }
            Err(err) => warn!(room = %self.room.code, bot = %bot, error = %err, "bot vote failed"),
        }
    }

    async fn bot_ready(&mut self, identity: String) {
        if self.room.status != RoomStatus::Waiting {
            return;
        }
        let already_ready = self
            .room
            .players
            .get(&identity)
            .is_some_and(|player| player.is_ready);
        if !already_ready {
            if let Err(err) = self.mutate(|room| room.confirm_ready(&identity)).await {
                warn!(room = %self.room.code, identity = %identity, error = %err, "failed to mark player ready");
                return;
            }
        }
        self.check_early_completion().await;
    }

    fn schedule_bot_submissions(&mut self, round: u32) {
        if !self.room.simulated {
            return;
        }
        let range = self.state.config().bots.submit_delay;
        for bot in bots::bot_ids(&self.room) {
            let delay = bots::sample_delay(range, &mut self.rng);
            self.spawn_bot_task(delay, RoomCommand::BotSubmit { bot, round });
        }
    }

    fn schedule_bot_votes(&mut self, round: u32) {
        if !self.room.simulated {
            return;
        }
        let range = self.state.config().bots.vote_delay;
        for bot in bots::bot_ids(&self.room) {
            let delay = bots::sample_delay(range, &mut self.rng);
            self.spawn_bot_task(delay, RoomCommand::BotVote { bot, round });
        }
    }

    /// Re-arm the current phase from the persisted deadline after loading a room.
    fn resume_timers(&mut self) {
        self.cancel_timers();
        if self.room.status != RoomStatus::Playing {
            return;
        }
        let Some(round) = self.room.current() else {
            return;
        };
        let (number, phase, total) = (round.number, round.phase, round.submissions.len());
        let remaining = round
            .phase_deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        info!(room = %self.room.code, round = number, phase = %phase, ?remaining, "resuming phase timer");

        match phase {
            RoundPhase::Playback => {
                let per_song = self.state.machine().timings().playback_per_song;
                let songs_left = if per_song.is_zero() {
                    0
                } else {
                    (remaining.as_millis().div_ceil(per_song.as_millis()) as usize).min(total)
                };
                let index = total - songs_left;
                let until_next = remaining.saturating_sub(per_song * songs_left.saturating_sub(1) as u32);
                if let Some(current) = self.room.current_mut() {
                    current.playback_index = (index < total).then_some(index);
                }
                self.arm(
                    until_next,
                    RoomCommand::PlaybackTick {
                        round: number,
                        index: index + 1,
                    },
                );
            }
            _ => {
                self.arm(
                    remaining,
                    RoomCommand::PhaseExpired {
                        round: number,
                        phase,
                    },
                );
                match phase {
                    RoundPhase::Submission => self.schedule_bot_submissions(number),
                    RoundPhase::Voting => self.schedule_bot_votes(number),
                    _ => {}
                }
            }
        }
    }

    fn is_current(&self, round: u32, phase: RoundPhase) -> bool {
        self.room.status == RoomStatus::Playing
            && self
                .room
                .current()
                .is_some_and(|current| current.number == round && current.phase == phase)
    }

    /// Replace the armed timer with one delivering `command` after `after`.
    fn arm(&mut self, after: Duration, command: RoomCommand) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer = Some(deliver_later(self.mailbox.clone(), after, command));
    }

    fn spawn_bot_task(&mut self, after: Duration, command: RoomCommand) {
        self.bot_tasks.retain(|task| !task.is_finished());
        self.bot_tasks
            .push(deliver_later(self.mailbox.clone(), after, command));
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        for task in self.bot_tasks.drain(..) {
            task.abort();
        }
    }

    fn is_abandoned(&self) -> bool {
        self.state.connections().connection_count(&self.room.code) == 0
            && self.last_activity.elapsed() >= self.state.config().abandon_after
    }

    fn stop(&mut self) {
        self.cancel_timers();
        let id = self.id;
        self.state
            .rooms()
            .remove_if(&self.room.code, |_, handle| handle.id() == id);
        self.state.connections().release_room(&self.room.code);
        info!(room = %self.room.code, "room actor stopped");
    }
}

/// Spawn a task that posts `command` to the room after `after`, unless the room is gone.
fn deliver_later(
    mailbox: mpsc::WeakSender<RoomCommand>,
    after: Duration,
    command: RoomCommand,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(after).await;
        if let Some(tx) = mailbox.upgrade() {
            let _ = tx.send(command).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::{AppConfig, PhaseTimings},
        dao::{
            models::RoomEntity,
            room_store::{RoomStore, memory::MemoryRoomStore},
            storage::StorageResult,
        },
        services::room_service,
        state::{AppState, room::tests::pool},
    };

    /// Memory store whose writes can be switched off.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemoryRoomStore,
        failing: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl RoomStore for FlakyStore {
        fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_room(room)
        }

        fn update_room(
            &self,
            room: RoomEntity,
            expected_version: u64,
        ) -> BoxFuture<'static, StorageResult<()>> {
            if self.failing.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(StorageError::unavailable(
                        "write refused".into(),
                        io::Error::other("offline"),
                    ))
                });
            }
            self.inner.update_room(room, expected_version)
        }

        fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
            self.inner.find_room(code)
        }

        fn room_exists(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.room_exists(code)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    async fn started_room(store: Arc<dyn RoomStore>) -> (SharedState, String) {
        let state = AppState::new(AppConfig::default());
        state.set_room_store(store).await;
        let room = room_service::create_room(&state, "host".into(), "Host".into(), 2)
            .await
            .unwrap();
        room_service::join_room(&state, &room.code, "p2".into(), "Two".into())
            .await
            .unwrap();
        room_service::set_ready(&state, &room.code, "host".into(), Some(pool(&["h1", "h2"])))
            .await
            .unwrap();
        room_service::set_ready(&state, &room.code, "p2".into(), Some(pool(&["a1", "a2"])))
            .await
            .unwrap();
        (state, room.code)
    }

    async fn current(state: &SharedState, code: &str) -> Room {
        room_service::snapshot(state, code).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_a_no_op() {
        let (state, code) = started_room(Arc::new(MemoryRoomStore::new())).await;
        let before = current(&state, &code).await;
        assert_eq!(before.phase(), Some(RoundPhase::Category));

        let handle = state.rooms().get(&code).unwrap().clone();
        for command in [
            RoomCommand::PhaseExpired {
                round: 1,
                phase: RoundPhase::Voting,
            },
            RoomCommand::PhaseExpired {
                round: 2,
                phase: RoundPhase::Category,
            },
            RoomCommand::PlaybackTick { round: 1, index: 1 },
        ] {
            handle.tx.send(command).await.unwrap();
        }

        let after = current(&state, &code).await;
        assert_eq!(after, before);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transition_is_retried_by_next_command() {
        let store = FlakyStore::default();
        let (state, code) = started_room(Arc::new(store.clone())).await;
        store.set_failing(true);

        sleep(Duration::from_secs(11)).await;
        let stuck = current(&state, &code).await;
        assert_eq!(stuck.phase(), Some(RoundPhase::Category));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(
            current(&state, &code).await.phase(),
            Some(RoundPhase::Category),
            "no timer is left armed after a failed transition"
        );

        store.set_failing(false);
        let resumed = current(&state, &code).await;
        assert_eq!(resumed.phase(), Some(RoundPhase::Submission));
        assert_eq!(resumed.version, stuck.version + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn player_errors_do_not_touch_the_room() {
        let (state, code) = started_room(Arc::new(MemoryRoomStore::new())).await;
        let before = current(&state, &code).await;

        let err = room_service::submit_song(&state, &code, "host".into(), "h1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::WrongPhase { .. }));
        let err = room_service::advance(&state, &code, "host".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        assert_eq!(current(&state, &code).await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_a_playing_room_rearms_its_deadline() {
        let store = MemoryRoomStore::new();
        let (state, code) = started_room(Arc::new(store.clone())).await;
        sleep(Duration::from_secs(11)).await;
        room_service::submit_song(&state, &code, "host".into(), "h1".into())
            .await
            .unwrap();
        assert_eq!(
            current(&state, &code).await.phase(),
            Some(RoundPhase::Submission)
        );

        let handle = state.rooms().get(&code).unwrap().clone();
        handle.shutdown();
        sleep(Duration::from_millis(10)).await;
        assert!(!state.rooms().contains_key(&code));

        let reloaded = current(&state, &code).await;
        assert_eq!(reloaded.phase(), Some(RoundPhase::Submission));
        assert_eq!(reloaded.current().unwrap().submissions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_advance_is_reserved_to_the_host() {
        let config = AppConfig {
            allow_manual_advance: true,
            ..AppConfig::default()
        };
        let state = AppState::new(config);
        state.set_room_store(Arc::new(MemoryRoomStore::new())).await;
        let code = room_service::create_room(&state, "host".into(), "Host".into(), 2)
            .await
            .unwrap()
            .code;
        for (identity, name) in [("p2", "Two"), ("p3", "Three")] {
            room_service::join_room(&state, &code, identity.into(), name.into())
                .await
                .unwrap();
        }
        room_service::set_ready(&state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();

        let err = room_service::advance(&state, &code, "host".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientPlayers { ready: 1 }));

        room_service::set_ready(&state, &code, "p2".into(), Some(pool(&["a1"])))
            .await
            .unwrap();
        let err = room_service::advance(&state, &code, "p2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let started = room_service::advance(&state, &code, "host".into())
            .await
            .unwrap();
        assert_eq!(started.phase(), Some(RoundPhase::Category));
        assert!(!started.players["p3"].is_ready);

        let next = room_service::advance(&state, &code, "host".into())
            .await
            .unwrap();
        assert_eq!(next.phase(), Some(RoundPhase::Submission));
    }

    async fn wait_until(state: &SharedState, code: &str, done: impl Fn(&Room) -> bool) -> Room {
        for _ in 0..2_000 {
            let room = current(state, code).await;
            if done(&room) {
                return room;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("room {code} never reached the awaited state");
    }

    /// One-round room with the host and two bots, returned as soon as voting opens.
    async fn voting_with_two_bots(state: &SharedState) -> String {
        let code = room_service::create_room(state, "host".into(), "Host".into(), 1)
            .await
            .unwrap()
            .code;
        room_service::set_ready(state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();
        room_service::add_bots(state, &code, "host".into(), 2)
            .await
            .unwrap();

        wait_until(state, &code, |room| room.phase() == Some(RoundPhase::Submission)).await;
        room_service::submit_song(state, &code, "host".into(), "h1".into())
            .await
            .unwrap();
        wait_until(state, &code, |room| room.phase() == Some(RoundPhase::Voting)).await;
        code
    }

    fn votes(room: &Room) -> usize {
        room.current().map_or(0, |round| round.vote_count())
    }

    #[tokio::test(start_paused = true)]
    async fn bot_votes_alone_leave_voting_open_until_the_deadline() {
        let state = AppState::new(AppConfig::default());
        state.set_room_store(Arc::new(MemoryRoomStore::new())).await;
        let voting = state.config().timings.voting;
        let code = voting_with_two_bots(&state).await;
        let opened = Instant::now();

        let voted = wait_until(&state, &code, |room| {
            votes(room) == 2 || room.status == RoomStatus::Completed
        })
        .await;
        assert_eq!(voted.phase(), Some(RoundPhase::Voting));
        assert_eq!(votes(&voted), 2);

        let closed = wait_until(&state, &code, |room| room.status == RoomStatus::Completed).await;
        assert!(opened.elapsed() + Duration::from_millis(200) >= voting);
        assert_eq!(votes(&closed), 2);
        assert!(closed.current().unwrap().scored);
    }

    #[tokio::test(start_paused = true)]
    async fn host_vote_after_the_bots_closes_voting_early() {
        let state = AppState::new(AppConfig::default());
        state.set_room_store(Arc::new(MemoryRoomStore::new())).await;
        let voting = state.config().timings.voting;
        let code = voting_with_two_bots(&state).await;
        let opened = Instant::now();

        let voted = wait_until(&state, &code, |room| votes(room) == 2).await;
        let target = voted
            .current()
            .unwrap()
            .submissions
            .iter()
            .find(|submission| submission.player_id != "host")
            .map(|submission| submission.player_id.clone())
            .unwrap();
        room_service::cast_vote(&state, &code, "host".into(), target)
            .await
            .unwrap();

        let closed = current(&state, &code).await;
        assert_eq!(closed.status, RoomStatus::Completed);
        assert_eq!(votes(&closed), 3);
        assert!(opened.elapsed() < voting);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_room_is_unloaded_and_reloaded_with_its_deadline() {
        let config = AppConfig {
            abandon_after: Duration::from_secs(5),
            timings: PhaseTimings {
                category: Duration::from_secs(60),
                ..PhaseTimings::default()
            },
            ..AppConfig::default()
        };
        let state = AppState::new(config);
        let store = MemoryRoomStore::new();
        state.set_room_store(Arc::new(store.clone())).await;
        let code = room_service::create_room(&state, "host".into(), "Host".into(), 2)
            .await
            .unwrap()
            .code;
        room_service::join_room(&state, &code, "p2".into(), "Two".into())
            .await
            .unwrap();
        room_service::set_ready(&state, &code, "host".into(), Some(pool(&["h1"])))
            .await
            .unwrap();
        room_service::set_ready(&state, &code, "p2".into(), Some(pool(&["a1"])))
            .await
            .unwrap();
        let started = current(&state, &code).await;
        assert_eq!(started.phase(), Some(RoundPhase::Category));
        let first = state.rooms().get(&code).unwrap().id();

        sleep(Duration::from_secs(6)).await;
        assert!(!state.rooms().contains_key(&code), "idle actor is still registered");

        // the category deadline passes while nobody holds the room
        sleep(Duration::from_secs(64)).await;
        let stored: Room = store.find_room(code.clone()).await.unwrap().unwrap().into();
        assert_eq!(stored.version, started.version);
        assert_eq!(stored.phase(), Some(RoundPhase::Category));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let connection = state.connections().register(tx);
        state.connections().attach(connection, &code, "host");

        let reloaded = current(&state, &code).await;
        assert_eq!(reloaded.phase(), Some(RoundPhase::Category));
        assert_eq!(reloaded.players.len(), 2);
        assert_ne!(state.rooms().get(&code).unwrap().id(), first);

        sleep(Duration::from_secs(61)).await;
        let advanced = current(&state, &code).await;
        assert_eq!(advanced.phase(), Some(RoundPhase::Submission));
        assert_eq!(advanced.version, started.version + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_write_replaces_a_pending_expiry() {
        let store = MemoryRoomStore::new();
        let (state, code) = started_room(Arc::new(store.clone())).await;
        let started = current(&state, &code).await;
        assert_eq!(started.phase(), Some(RoundPhase::Category));

        // another writer moves the room to submission behind the actor's back
        let mut elsewhere = started.clone();
        let round = elsewhere.current_mut().unwrap();
        round.phase = RoundPhase::Submission;
        round.phase_deadline = SystemTime::now() + Duration::from_secs(20);
        elsewhere.version += 1;
        store
            .update_room(elsewhere.clone().into(), started.version)
            .await
            .unwrap();

        // the category timer fires, hits the conflict and adopts the stored room
        sleep(Duration::from_secs(11)).await;
        let adopted = current(&state, &code).await;
        assert_eq!(adopted.phase(), Some(RoundPhase::Submission));
        assert_eq!(adopted.version, elsewhere.version);

        let again = current(&state, &code).await;
        assert_eq!(again.phase(), Some(RoundPhase::Submission));
        assert_eq!(again.version, elsewhere.version);

        sleep(Duration::from_secs(20)).await;
        let expired = current(&state, &code).await;
        assert_ne!(expired.phase(), Some(RoundPhase::Submission));
        assert_eq!(expired.version, elsewhere.version + 1);
    }
}
