use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::feed::envelope::{ChangeEnvelope, Record};
use crate::feed::store::{ApplyOutcome, MirrorStore};

/// Counts of what a replay did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub inserted: usize,
    pub replaced: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored: usize,
}

impl ReplaySummary {
    fn count(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::Replaced => self.replaced += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Deleted => self.deleted += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Read a JSON array of records.
pub async fn load_snapshot(path: &Path) -> Result<Vec<Record>> {
    let text = tokio::fs::read_to_string(path).await?;
    let values: Vec<Value> = serde_json::from_str(&text)?;
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(record) => Ok(record),
            other => Err(SyncError::InvalidEnvelope(format!(
                "snapshot entry {} is not an object: {}",
                index, other
            ))),
        })
        .collect()
}

/// Read a JSON-lines envelope log. Blank lines and lines starting with `#`
/// are skipped. Each line is either a normalized envelope or a raw realtime
/// payload.
pub async fn load_envelopes(path: &Path) -> Result<Vec<ChangeEnvelope>> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut envelopes = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        let envelope = ChangeEnvelope::decode(value).map_err(|e| {
            SyncError::InvalidEnvelope(format!("line {}: {}", number + 1, e))
        })?;
        envelopes.push(envelope);
    }

    Ok(envelopes)
}

/// Apply `envelopes` to `store` in order.
pub fn fold(store: &mut MirrorStore, envelopes: Vec<ChangeEnvelope>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for envelope in envelopes {
        summary.count(store.apply(envelope));
    }
    tracing::info!(
        entity = %store.kind(),
        records = store.len(),
        ignored = summary.ignored,
        "Replay finished"
    );
    summary
}
