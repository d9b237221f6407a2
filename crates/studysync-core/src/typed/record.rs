//! Typed remote records.
//!
//! Every record arrives as `{ id, object, data_updated_at, data: {...} }`.
//! `Resource::<D>::decode` checks `object` and decodes `data` into `D`;
//! `RecordData::apply` writes it into storage as an upsert by id.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RecordError, StoreError};
use crate::store::levels::{LevelProgressionFields, SrsSystemFields};
use crate::store::subjects::{
    AssignmentFields, ReviewStatisticFields, StudyMaterialFields, SubjectFields,
};
use crate::store::{LevelProgressionRepository, Properties, SrsSystemRepository, SubjectRepository};

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<D> {
    /// 0 for singular resources that carry no id.
    pub id: i64,
    pub object: String,
    pub data_updated_at: Option<DateTime<Utc>>,
    pub data: D,
}

#[derive(Deserialize)]
struct Envelope {
    id: Option<i64>,
    object: String,
    #[serde(default)]
    data_updated_at: Option<DateTime<Utc>>,
    data: Value,
}

impl<D: RecordData> Resource<D> {
    pub fn decode(value: Value) -> Result<Self, RecordError> {
        let envelope: Envelope = serde_json::from_value(value)?;
        if !D::OBJECTS.contains(&envelope.object.as_str()) {
            return Err(RecordError::UnexpectedObject {
                expected: D::OBJECTS,
                found: envelope.object,
            });
        }
        let id = match (envelope.id, D::NEEDS_ID) {
            (Some(id), _) => id,
            (None, false) => 0,
            (None, true) => {
                return Err(RecordError::MissingId {
                    object: envelope.object,
                });
            }
        };
        let data = serde_json::from_value(envelope.data)?;
        Ok(Self {
            id,
            object: envelope.object,
            data_updated_at: envelope.data_updated_at,
            data,
        })
    }
}

/// Payload of one remote object type.
pub trait RecordData: DeserializeOwned + Send + Sync + Sized + 'static {
    /// Accepted values of the envelope's `object` field.
    const OBJECTS: &'static [&'static str];

    /// Singular resources (user, summary) have no id.
    const NEEDS_ID: bool = true;

    fn apply(conn: &Connection, resource: &Resource<Self>) -> Result<(), StoreError>;
}

// --- subjects ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectData {
    pub level: i32,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub characters: Option<String>,
    #[serde(default)]
    pub hidden_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lesson_position: i32,
    #[serde(default)]
    pub spaced_repetition_system_id: Option<i64>,
}

impl RecordData for SubjectData {
    const OBJECTS: &'static [&'static str] = &["radical", "kanji", "vocabulary", "kana_vocabulary"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        SubjectRepository::upsert_subject(
            conn,
            r.id,
            &SubjectFields {
                object: r.object.clone(),
                level: r.data.level,
                slug: r.data.slug.clone(),
                characters: r.data.characters.clone(),
                hidden_at: r.data.hidden_at,
                lesson_position: r.data.lesson_position,
                srs_system_id: r.data.spaced_repetition_system_id,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssignmentData {
    pub subject_id: i64,
    pub subject_type: String,
    pub srs_stage: i32,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub burned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resurrected_at: Option<DateTime<Utc>>,
}

impl RecordData for AssignmentData {
    const OBJECTS: &'static [&'static str] = &["assignment"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        let d = &r.data;
        SubjectRepository::upsert_assignment(
            conn,
            r.id,
            &AssignmentFields {
                subject_id: d.subject_id,
                subject_type: d.subject_type.clone(),
                srs_stage: d.srs_stage,
                unlocked_at: d.unlocked_at,
                started_at: d.started_at,
                passed_at: d.passed_at,
                burned_at: d.burned_at,
                available_at: d.available_at,
                resurrected_at: d.resurrected_at,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReviewStatisticData {
    pub subject_id: i64,
    pub subject_type: String,
    pub percentage_correct: i32,
}

impl RecordData for ReviewStatisticData {
    const OBJECTS: &'static [&'static str] = &["review_statistic"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        SubjectRepository::upsert_review_statistic(
            conn,
            &ReviewStatisticFields {
                subject_id: r.data.subject_id,
                subject_type: r.data.subject_type.clone(),
                percentage_correct: r.data.percentage_correct,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StudyMaterialData {
    pub subject_id: i64,
    pub subject_type: String,
    #[serde(default)]
    pub meaning_note: Option<String>,
    #[serde(default)]
    pub reading_note: Option<String>,
}

impl RecordData for StudyMaterialData {
    const OBJECTS: &'static [&'static str] = &["study_material"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        SubjectRepository::upsert_study_material(
            conn,
            &StudyMaterialFields {
                subject_id: r.data.subject_id,
                subject_type: r.data.subject_type.clone(),
                meaning_note: r.data.meaning_note.clone(),
                reading_note: r.data.reading_note.clone(),
            },
        )
    }
}

// --- levels / srs -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelProgressionData {
    pub level: i32,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub abandoned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordData for LevelProgressionData {
    const OBJECTS: &'static [&'static str] = &["level_progression"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        let d = &r.data;
        LevelProgressionRepository::upsert(
            conn,
            r.id,
            &LevelProgressionFields {
                level: d.level,
                unlocked_at: d.unlocked_at,
                started_at: d.started_at,
                passed_at: d.passed_at,
                completed_at: d.completed_at,
                abandoned_at: d.abandoned_at,
                created_at: d.created_at,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SrsSystemData {
    pub name: String,
    pub unlocking_stage_position: i32,
    pub starting_stage_position: i32,
    pub passing_stage_position: i32,
    pub burning_stage_position: i32,
}

impl RecordData for SrsSystemData {
    const OBJECTS: &'static [&'static str] = &["spaced_repetition_system"];

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        SrsSystemRepository::upsert(
            conn,
            r.id,
            &SrsSystemFields {
                name: r.data.name.clone(),
                unlocking_stage: r.data.unlocking_stage_position,
                starting_stage: r.data.starting_stage_position,
                passing_stage: r.data.passing_stage_position,
                burning_stage: r.data.burning_stage_position,
            },
        )
    }
}

// --- singular resources -----------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub max_level_granted: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserData {
    pub username: String,
    pub level: i32,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default)]
    pub current_vacation_started_at: Option<DateTime<Utc>>,
}

impl RecordData for UserData {
    const OBJECTS: &'static [&'static str] = &["user"];
    const NEEDS_ID: bool = false;

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        let d = &r.data;
        Properties::set_username(conn, &d.username)?;
        Properties::set_user_level(conn, d.level)?;
        if let Some(max) = d.subscription.max_level_granted {
            Properties::set_max_level_granted(conn, max)?;
        }
        Properties::set_vacation_mode(conn, d.current_vacation_started_at.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryData {
    #[serde(default)]
    pub next_reviews_at: Option<DateTime<Utc>>,
}

impl RecordData for SummaryData {
    const OBJECTS: &'static [&'static str] = &["report"];
    const NEEDS_ID: bool = false;

    fn apply(conn: &Connection, r: &Resource<Self>) -> Result<(), StoreError> {
        Properties::set_next_reviews_at(conn, r.data.next_reviews_at)
    }
}

pub type SubjectRecord = Resource<SubjectData>;
pub type AssignmentRecord = Resource<AssignmentData>;
pub type ReviewStatisticRecord = Resource<ReviewStatisticData>;
pub type StudyMaterialRecord = Resource<StudyMaterialData>;
pub type LevelProgressionRecord = Resource<LevelProgressionData>;
pub type SrsSystemRecord = Resource<SrsSystemData>;
pub type UserRecord = Resource<UserData>;
pub type SummaryRecord = Resource<SummaryData>;
