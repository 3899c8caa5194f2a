use std::str::FromStr;

use serde_json::Value;

use crate::feed::envelope::{ChangeEnvelope, EntityKind, Operation};

/// Equality filter on a parent key, e.g. `job_id = 5`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedFilter {
    pub column: String,
    pub value: Value,
}

impl FeedFilter {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn for_candidate(candidate_id: &str) -> Self {
        Self::equals("candidate_id", candidate_id)
    }

    pub fn for_recruiter(recruiter_id: &str) -> Self {
        Self::equals("recruiter_id", recruiter_id)
    }

    pub fn for_job(job_id: u64) -> Self {
        Self::equals("job_id", job_id)
    }

    /// Pick one filter from the parent keys a view knows about.
    ///
    /// Candidate always wins. Applications then prefer job over recruiter,
    /// interviews recruiter over job. Jobs are never filtered.
    pub fn from_parents(
        kind: EntityKind,
        candidate_id: Option<&str>,
        recruiter_id: Option<&str>,
        job_id: Option<u64>,
    ) -> Option<Self> {
        let by_candidate = candidate_id.map(Self::for_candidate);
        match kind {
            EntityKind::Jobs => None,
            EntityKind::Applications => by_candidate
                .or_else(|| job_id.map(Self::for_job))
                .or_else(|| recruiter_id.map(Self::for_recruiter)),
            EntityKind::Interviews => by_candidate
                .or_else(|| recruiter_id.map(Self::for_recruiter))
                .or_else(|| job_id.map(Self::for_job)),
        }
    }

    /// Client-side check applied on top of the remote filter.
    ///
    /// Deletes always pass since they only carry the id. A record that does
    /// not include the column also passes.
    pub fn matches(&self, envelope: &ChangeEnvelope) -> bool {
        if envelope.operation == Operation::Delete {
            return true;
        }
        match envelope.record.get(&self.column) {
            None => true,
            Some(value) => scalar_text(value) == scalar_text(&self.value),
        }
    }

    /// Wire form understood by the realtime service: `column=eq.value`.
    pub fn to_query(&self) -> String {
        format!(
            "{}=eq.{}",
            self.column,
            scalar_text(&self.value).unwrap_or_default()
        )
    }
}

impl std::fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// Parses `column=value`. Integer values are kept numeric.
impl FromStr for FeedFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, value) = s
            .split_once('=')
            .ok_or_else(|| format!("filter '{}' must look like column=value", s))?;
        let column = column.trim();
        let value = value.trim();
        if column.is_empty() || value.is_empty() {
            return Err(format!("filter '{}' must look like column=value", s));
        }
        let value = value.strip_prefix("eq.").unwrap_or(value);
        Ok(match value.parse::<u64>() {
            Ok(n) => Self::equals(column, n),
            Err(_) => Self::equals(column, value),
        })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
