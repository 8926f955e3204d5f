use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::error::ValidationError;

/// A persisted job record, as stored in `jobs.json` and `dlq.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    /// Caller-supplied fields the queue does not interpret. Kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn pending(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            command: new.command,
            state: JobState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            extra: new.extra,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownState(s.to_string()))
    }
}

/// Live job counts keyed by state. States with no jobs are absent.
pub type StateSummary = BTreeMap<JobState, usize>;

/// A validated job submission.
///
/// Only `id` and `command` are interpreted; `state`, `attempts` and the
/// timestamps are owned by the store and dropped if the caller sent them.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub extra: Map<String, Value>,
}

const STORE_OWNED_FIELDS: [&str; 4] = ["state", "attempts", "created_at", "updated_at"];

impl NewJob {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Result<Self, ValidationError> {
        let id = non_empty("id", id.into())?;
        let command = non_empty("command", command.into())?;
        Ok(Self {
            id,
            command,
            extra: Map::new(),
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let id = take_string(&mut fields, "id")?;
        let command = take_string(&mut fields, "command")?;
        for key in STORE_OWNED_FIELDS {
            fields.remove(key);
        }

        Ok(Self {
            id,
            command,
            extra: fields,
        })
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &'static str) -> Result<String, ValidationError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(key)),
        Some(Value::String(s)) => non_empty(key, s),
        Some(_) => Err(ValidationError::EmptyField(key)),
    }
}

fn non_empty(key: &'static str, value: String) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(key));
    }
    Ok(value)
}

/// RFC 3339 on write. On read, also accepts the offset-less ISO 8601 form
/// older queue files were written with, interpreted as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Ok(ts.with_timezone(&Utc)),
            Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc()),
        }
    }
}
