use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// A row as delivered by the change feed.
pub type Record = serde_json::Map<String, Value>;

/// Column holding the primary key in every mirrored table.
pub const ID_COLUMN: &str = "id";

/// The remote collections mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Jobs,
    /// Candidate applications. Recruiter views list candidates from this table.
    Applications,
    Interviews,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Jobs => "jobs",
            EntityKind::Applications => "applications",
            EntityKind::Interviews => "interviews",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "jobs" => Some(EntityKind::Jobs),
            "applications" | "candidates" => Some(EntityKind::Applications),
            "interviews" => Some(EntityKind::Interviews),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EntityKind::from_table(s).ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Primary key of a mirrored record.
///
/// Jobs use integer keys and applications use UUIDs; both normalize to their
/// textual form so `7` and `"7"` name the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// The id stored in a record's `id` column.
    pub fn of(record: &Record) -> Option<Self> {
        record.get(ID_COLUMN).and_then(Self::from_value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        RecordId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "record id must be a non-empty string or a number, got {}",
                value
            ))
        })
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// One remote mutation, normalized.
///
/// `Delete` envelopes carry only the id; their `record` is empty. For inserts
/// and updates `record_id` is always the record's own `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NormalizedEnvelope")]
pub struct ChangeEnvelope {
    pub entity_kind: EntityKind,
    pub operation: Operation,
    pub record_id: RecordId,
    #[serde(default)]
    pub record: Record,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

/// Wire form of [`ChangeEnvelope`]. `record_id` is optional for inserts and
/// updates, whose id comes from `record.id`.
#[derive(Debug, Deserialize)]
struct NormalizedEnvelope {
    entity_kind: EntityKind,
    operation: Operation,
    #[serde(default)]
    record_id: Option<RecordId>,
    #[serde(default)]
    record: Record,
    #[serde(default = "Utc::now")]
    observed_at: DateTime<Utc>,
}

impl TryFrom<NormalizedEnvelope> for ChangeEnvelope {
    type Error = SyncError;

    fn try_from(wire: NormalizedEnvelope) -> Result<Self> {
        let mut envelope = match wire.operation {
            Operation::Insert | Operation::Update => {
                let envelope = Self::with_record(wire.entity_kind, wire.operation, wire.record)?;
                match wire.record_id {
                    Some(claimed) if claimed != envelope.record_id => {
                        return Err(SyncError::InvalidEnvelope(format!(
                            "record_id {} does not match record id {}",
                            claimed, envelope.record_id
                        )));
                    }
                    _ => envelope,
                }
            }
            Operation::Delete => {
                let record_id = wire
                    .record_id
                    .or_else(|| RecordId::of(&wire.record))
                    .ok_or_else(|| {
                        SyncError::InvalidEnvelope(format!(
                            "{} delete without a record_id",
                            wire.entity_kind
                        ))
                    })?;
                Self::delete(wire.entity_kind, record_id)
            }
        };
        envelope.observed_at = wire.observed_at;
        Ok(envelope)
    }
}

/// Payload shape pushed by the realtime database feed.
#[derive(Debug, Deserialize)]
struct ChangePayload {
    #[serde(rename = "eventType", alias = "type")]
    event_type: Operation,
    table: String,
    #[serde(default)]
    new: Option<Record>,
    #[serde(default)]
    old: Option<Record>,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEnvelope {
    pub fn insert(entity_kind: EntityKind, record: Record) -> Result<Self> {
        Self::with_record(entity_kind, Operation::Insert, record)
    }

    pub fn update(entity_kind: EntityKind, record: Record) -> Result<Self> {
        Self::with_record(entity_kind, Operation::Update, record)
    }

    pub fn delete(entity_kind: EntityKind, record_id: impl Into<RecordId>) -> Self {
        Self {
            entity_kind,
            operation: Operation::Delete,
            record_id: record_id.into(),
            record: Record::new(),
            observed_at: Utc::now(),
        }
    }

    fn with_record(entity_kind: EntityKind, operation: Operation, record: Record) -> Result<Self> {
        let record_id = RecordId::of(&record).ok_or_else(|| {
            SyncError::InvalidEnvelope(format!("{} {} without an id", entity_kind, operation))
        })?;
        Ok(Self {
            entity_kind,
            operation,
            record_id,
            record,
            observed_at: Utc::now(),
        })
    }

    /// Decode a raw realtime payload (`eventType`, `table`, `new`, `old`).
    ///
    /// Inserts and updates take their id from `new.id`; deletes from `old.id`.
    pub fn from_change_payload(value: Value) -> Result<Self> {
        let payload: ChangePayload = serde_json::from_value(value)?;
        let entity_kind = EntityKind::from_table(&payload.table).ok_or_else(|| {
            SyncError::InvalidEnvelope(format!("unmirrored table '{}'", payload.table))
        })?;

        let mut envelope = match payload.event_type {
            Operation::Insert | Operation::Update => {
                let record = payload.new.unwrap_or_default();
                Self::with_record(entity_kind, payload.event_type, record)?
            }
            Operation::Delete => {
                let record_id = payload
                    .old
                    .as_ref()
                    .and_then(RecordId::of)
                    .ok_or_else(|| {
                        SyncError::InvalidEnvelope(format!(
                            "{} delete without old.id",
                            entity_kind
                        ))
                    })?;
                Self::delete(entity_kind, record_id)
            }
        };
        if let Some(at) = payload.commit_timestamp {
            envelope.observed_at = at;
        }
        Ok(envelope)
    }

    /// Decode either the normalized envelope form or a raw realtime payload.
    pub fn decode(value: Value) -> Result<Self> {
        if value.get("operation").is_some() {
            let wire: NormalizedEnvelope = serde_json::from_value(value)?;
            Self::try_from(wire)
        } else {
            Self::from_change_payload(value)
        }
    }
}
