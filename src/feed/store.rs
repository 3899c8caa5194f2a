use std::collections::HashSet;

use crate::feed::envelope::{ChangeEnvelope, EntityKind, Operation, Record, RecordId};

/// What applying one envelope did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New record, placed first.
    Inserted,
    /// Insert for a known id; overwritten where it stood.
    Replaced,
    /// Fields merged into the existing record.
    Updated,
    Deleted,
    /// Update or delete for an absent id, or an envelope for another entity
    /// kind. Absent ids come from benign reordering and are not errors.
    Ignored,
}

/// Local replica of one remote collection, newest record first.
///
/// Merge rules make at-least-once delivery safe:
/// - insert of a known id overwrites in place; otherwise the record is prepended
/// - update shallow-merges into the existing record and never inserts
/// - delete removes the record; unknown ids are a no-op
///
/// Updates and deletes never reorder. Ids are unique.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    kind: EntityKind,
    entries: Vec<(RecordId, Record)>,
}

impl MirrorStore {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    /// Seed from an initial snapshot fetched out of band.
    pub fn with_snapshot(kind: EntityKind, records: Vec<Record>) -> Self {
        let mut store = Self::new(kind);
        store.replace_snapshot(records);
        store
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn apply(&mut self, envelope: ChangeEnvelope) -> ApplyOutcome {
        if envelope.entity_kind != self.kind {
            tracing::warn!(
                store = %self.kind,
                entity = %envelope.entity_kind,
                record_id = %envelope.record_id,
                "Envelope for another entity kind ignored"
            );
            return ApplyOutcome::Ignored;
        }

        let position = self.position(&envelope.record_id);
        let outcome = match (envelope.operation, position) {
            (Operation::Insert, Some(pos)) => {
                self.entries[pos].1 = envelope.record;
                ApplyOutcome::Replaced
            }
            (Operation::Insert, None) => {
                self.entries
                    .insert(0, (envelope.record_id.clone(), envelope.record));
                ApplyOutcome::Inserted
            }
            (Operation::Update, Some(pos)) => {
                let existing = &mut self.entries[pos].1;
                for (field, value) in envelope.record {
                    existing.insert(field, value);
                }
                ApplyOutcome::Updated
            }
            (Operation::Delete, Some(pos)) => {
                self.entries.remove(pos);
                ApplyOutcome::Deleted
            }
            (Operation::Update | Operation::Delete, None) => ApplyOutcome::Ignored,
        };

        tracing::debug!(
            entity = %self.kind,
            operation = %envelope.operation,
            record_id = %envelope.record_id,
            outcome = ?outcome,
            "Change applied"
        );
        outcome
    }

    /// Replace the whole collection, e.g. after the upstream query changed.
    ///
    /// Records without an id are skipped; a repeated id keeps its first
    /// occurrence. Returns the number of records kept.
    pub fn replace_snapshot(&mut self, records: Vec<Record>) -> usize {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(records.len());

        for record in records {
            let Some(id) = RecordId::of(&record) else {
                tracing::warn!(entity = %self.kind, "Snapshot record without id skipped");
                continue;
            };
            if !seen.insert(id.clone()) {
                tracing::debug!(entity = %self.kind, record_id = %id, "Duplicate snapshot record skipped");
                continue;
            }
            entries.push((id, record));
        }

        self.entries = entries;
        self.entries.len()
    }

    /// Current records in display order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.entries.iter().map(|(_, record)| record.clone()).collect()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.position(id).map(|pos| &self.entries[pos].1)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing == id)
    }
}
