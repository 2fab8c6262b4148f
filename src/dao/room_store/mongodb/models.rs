use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{
    dao::models::{PlayerEntity, RoomEntity, RoundEntity, SubmissionEntity},
    state::room::{RoomStatus, RoundPhase},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    number: u32,
    category: String,
    phase: RoundPhase,
    phase_deadline: DateTime,
    submissions: Vec<SubmissionEntity>,
    #[serde(default)]
    scored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    code: String,
    status: RoomStatus,
    players: Vec<PlayerEntity>,
    categories: Vec<String>,
    current_round: u32,
    total_rounds: u32,
    rounds: Vec<MongoRoundDocument>,
    #[serde(default)]
    simulated: bool,
    version: i64,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<RoundEntity> for MongoRoundDocument {
    fn from(value: RoundEntity) -> Self {
        Self {
            number: value.number,
            category: value.category,
            phase: value.phase,
            phase_deadline: DateTime::from_system_time(value.phase_deadline),
            submissions: value.submissions,
            scored: value.scored,
        }
    }
}

impl From<MongoRoundDocument> for RoundEntity {
    fn from(value: MongoRoundDocument) -> Self {
        Self {
            number: value.number,
            category: value.category,
            phase: value.phase,
            phase_deadline: value.phase_deadline.to_system_time(),
            submissions: value.submissions,
            scored: value.scored,
        }
    }
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            code: value.code,
            status: value.status,
            players: value.players,
            categories: value.categories,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            rounds: value.rounds.into_iter().map(Into::into).collect(),
            simulated: value.simulated,
            version: value.version as i64,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoRoomDocument> for RoomEntity {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            code: value.code,
            status: value.status,
            players: value.players,
            categories: value.categories,
            current_round: value.current_round,
            total_rounds: value.total_rounds,
            rounds: value.rounds.into_iter().map(Into::into).collect(),
            simulated: value.simulated,
            version: value.version.max(0) as u64,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

pub fn doc_code(code: &str) -> Document {
    doc! {"_id": code}
}

pub fn doc_code_at_version(code: &str, version: u64) -> Document {
    doc! {"_id": code, "version": version as i64}
}
