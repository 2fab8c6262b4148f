use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::extract::ws::Message;
use serde_json::Value;
use song_wars_back::{
    config::AppConfig,
    dao::room_store::memory::MemoryRoomStore,
    services::room_service,
    state::{
        AppState, SharedState,
        room::{Room, RoomStatus, RoundPhase, Track},
    },
};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};

const POLL: Duration = Duration::from_millis(250);

fn track(id: &str) -> Track {
    Track {
        track_id: id.to_string(),
        track_name: format!("Song {id}"),
        track_artist: "Host".into(),
        track_image: None,
    }
}

async fn wait_for(state: &SharedState, code: &str, what: &str, done: impl Fn(&Room) -> bool) -> Room {
    for _ in 0..400 {
        let room = room_service::snapshot(state, code).await.unwrap();
        if done(&room) {
            return room;
        }
        sleep(POLL).await;
    }
    panic!("room {code} never reached {what}");
}

fn in_phase(round: u32, phase: RoundPhase) -> impl Fn(&Room) -> bool {
    move |room| room.current_round == round && room.phase() == Some(phase)
}

fn assert_round_count(room: &Room) {
    assert_eq!(
        room.rounds.len() as u32,
        room.current_round.min(room.total_rounds)
    );
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    events
}

fn count_kind(events: &[Value], kind: &str) -> usize {
    events.iter().filter(|event| event["type"] == kind).count()
}

/// Points by rank for the vote splits three players can produce without self-votes.
fn expected_points(votes_by_rank: &[u64]) -> Vec<u64> {
    match votes_by_rank {
        [1, 1, 1] => vec![3, 2, 1],
        [2, 1, 0] => vec![3, 2, 0],
        other => panic!("impossible vote split {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn three_rounds_with_two_bots() {
    let state = AppState::new(AppConfig::default());
    state.set_room_store(Arc::new(MemoryRoomStore::new())).await;

    let room = room_service::create_room(&state, "host".into(), "Host".into(), 3)
        .await
        .unwrap();
    let code = room.code.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = state.connections().register(tx);
    state.connections().attach(connection, &code, "host");

    room_service::set_ready(
        &state,
        &code,
        "host".into(),
        Some(vec![track("h1"), track("h2"), track("h3")]),
    )
    .await
    .unwrap();
    room_service::add_bots(&state, &code, "host".into(), 2)
        .await
        .unwrap();

    let mut expected_totals: HashMap<String, u64> = HashMap::new();
    let mut events = Vec::new();

    for round in 1..=3u32 {
        let room = wait_for(&state, &code, "category", in_phase(round, RoundPhase::Category)).await;
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.players.len(), 3);
        assert_round_count(&room);

        wait_for(&state, &code, "submission", in_phase(round, RoundPhase::Submission)).await;
        let opened = Instant::now();
        room_service::submit_song(&state, &code, "host".into(), format!("h{round}"))
            .await
            .unwrap();

        let playback = wait_for(&state, &code, "playback", in_phase(round, RoundPhase::Playback)).await;
        assert!(
            opened.elapsed() < state.config().timings.submission,
            "all submissions in should skip the rest of the submission window"
        );
        assert_eq!(playback.current().unwrap().submissions.len(), 3);

        let voting = wait_for(&state, &code, "voting", in_phase(round, RoundPhase::Voting)).await;
        let voting_opened = Instant::now();
        let target = voting
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

        let scored = if round < 3 {
            wait_for(&state, &code, "results", in_phase(round, RoundPhase::Results)).await
        } else {
            wait_for(&state, &code, "completion", |room| {
                room.status == RoomStatus::Completed
            })
            .await
        };
        assert!(
            voting_opened.elapsed() < state.config().timings.voting,
            "all votes in should skip the rest of the voting window"
        );
        assert_round_count(&scored);

        let current = scored.current().unwrap();
        assert!(current.scored);
        assert_eq!(current.vote_count(), 3);
        for submission in &current.submissions {
            assert!(
                !submission.votes.contains(&submission.player_id),
                "{} voted for themselves",
                submission.player_id
            );
        }

        events.extend(drain(&mut rx));
        let results = events
            .iter()
            .find(|event| event["type"] == "round_results" && event["round"] == round)
            .unwrap_or_else(|| panic!("no round_results for round {round}"));
        let awards = results["awards"].as_array().unwrap();
        assert_eq!(awards.len(), 3);
        let votes: Vec<u64> = awards.iter().map(|a| a["votes"].as_u64().unwrap()).collect();
        let points: Vec<u64> = awards.iter().map(|a| a["points"].as_u64().unwrap()).collect();
        assert_eq!(points, expected_points(&votes));
        for award in awards {
            let player = award["player_id"].as_str().unwrap();
            let submission = current
                .submissions
                .iter()
                .find(|s| s.player_id == player)
                .unwrap();
            assert_eq!(award["votes"].as_u64().unwrap(), submission.votes.len() as u64);
            *expected_totals.entry(player.to_string()).or_default() +=
                award["points"].as_u64().unwrap();
        }

        for player in scored.players.values() {
            assert_eq!(
                u64::from(player.points),
                expected_totals.get(&player.identity).copied().unwrap_or(0),
                "points of {}",
                player.identity
            );
        }
    }

    let finished = room_service::snapshot(&state, &code).await.unwrap();
    assert_eq!(finished.status, RoomStatus::Completed);
    assert_eq!(finished.rounds.len(), 3);
    assert_eq!(
        finished.players.values().map(|p| u64::from(p.points)).sum::<u64>(),
        expected_totals.values().sum::<u64>()
    );

    events.extend(drain(&mut rx));
    assert_eq!(count_kind(&events, "now_playing"), 9);
    assert_eq!(count_kind(&events, "round_results"), 3);

    // a completed room arms no further timers
    sleep(Duration::from_secs(120)).await;
    let later = room_service::snapshot(&state, &code).await.unwrap();
    assert_eq!(later.version, finished.version);
}
