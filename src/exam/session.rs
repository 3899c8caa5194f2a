use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidTransition;

/// One assessment section, in the order candidates normally take them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionId {
    Psychometric,
    TechnicalText,
    Coding,
}

impl SectionId {
    pub const ALL: [SectionId; 3] = [
        SectionId::Psychometric,
        SectionId::TechnicalText,
        SectionId::Coding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::Psychometric => "psychometric",
            SectionId::TechnicalText => "technical-text",
            SectionId::Coding => "coding",
        }
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SectionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionId::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| format!("unknown section '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Inactive,
    Active,
    Completed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Inactive => write!(f, "inactive"),
            SessionState::Active => write!(f, "active"),
            SessionState::Completed => write!(f, "completed"),
        }
    }
}

/// Why a session reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Manual submission, including a confirmed navigation away from a section.
    Completed,
    Timeout,
    /// The escalation policy auto-submitted the session.
    Escalated,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Completed => write!(f, "completed"),
            EndReason::Timeout => write!(f, "timeout"),
            EndReason::Escalated => write!(f, "escalated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Contribution of one violation to a severity score.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => f.pad("low"),
            Severity::Medium => f.pad("medium"),
            Severity::High => f.pad("high"),
            Severity::Critical => f.pad("critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    TabSwitchAttempt,
    VisibilityLoss,
    FocusLoss,
}

impl ViolationKind {
    pub fn severity(&self) -> Severity {
        match self {
            ViolationKind::TabSwitchAttempt => Severity::Medium,
            ViolationKind::VisibilityLoss => Severity::Medium,
            ViolationKind::FocusLoss => Severity::Low,
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::TabSwitchAttempt => f.pad("tab-switch-attempt"),
            ViolationKind::VisibilityLoss => f.pad("visibility-loss"),
            ViolationKind::FocusLoss => f.pad("focus-loss"),
        }
    }
}

/// An integrity signal recorded against a session. Never removed once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub timestamp: DateTime<Utc>,
    pub section_id: SectionId,
}

/// Violation counts for reporting. Every severity appears, zero or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<ViolationKind, usize>,
}

impl ViolationSummary {
    pub fn from_events(events: &[ViolationEvent]) -> Self {
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut by_kind = BTreeMap::new();
        for event in events {
            *by_severity.entry(event.kind.severity()).or_default() += 1;
            *by_kind.entry(event.kind).or_default() += 1;
        }
        Self {
            total: events.len(),
            by_severity,
            by_kind,
        }
    }
}

/// How `advance_section` moved the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMove {
    /// Target was already the current section.
    Unchanged,
    /// Target is the next section in program order.
    Sequential,
    /// Target is a member of the program but not the next one.
    Jump,
}

/// One candidate's pass through an ordered list of assessment sections.
///
/// `Inactive -> Active -> Completed`, with `Completed` terminal. While active,
/// `current_section` is always a member of `sections`. Once completed, every
/// transition and violation is refused, and a repeated `end` is a no-op.
///
/// A session is owned by a single candidate tab. Two tabs opening the same
/// assessment produce two independent sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ExamSession {
    id: Uuid,
    candidate_id: String,
    job_id: u64,
    sections: Vec<SectionId>,
    current_section: Option<SectionId>,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
    violations: Vec<ViolationEvent>,
}

impl ExamSession {
    pub fn new(candidate_id: impl Into<String>, job_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id: candidate_id.into(),
            job_id,
            sections: Vec::new(),
            current_section: None,
            state: SessionState::Inactive,
            started_at: None,
            ended_at: None,
            end_reason: None,
            violations: Vec::new(),
        }
    }

    /// Start the session on the first of `sections`.
    pub fn begin(&mut self, sections: Vec<SectionId>) -> Result<(), InvalidTransition> {
        if self.state != SessionState::Inactive {
            return Err(InvalidTransition::NotInactive(self.state));
        }
        let first = *sections.first().ok_or(InvalidTransition::EmptySections)?;
        let mut seen = HashSet::new();
        if let Some(repeated) = sections.iter().find(|s| !seen.insert(**s)) {
            return Err(InvalidTransition::DuplicateSection(*repeated));
        }

        self.sections = sections;
        self.current_section = Some(first);
        self.state = SessionState::Active;
        self.started_at = Some(Utc::now());

        tracing::info!(
            session_id = %self.id,
            candidate_id = %self.candidate_id,
            job_id = self.job_id,
            section = %first,
            sections = self.sections.len(),
            "Exam session started"
        );
        Ok(())
    }

    /// Move to `target`. Ordering is not enforced, only membership.
    pub fn advance_section(&mut self, target: SectionId) -> Result<SectionMove, InvalidTransition> {
        if self.state != SessionState::Active {
            return Err(InvalidTransition::NotActive(self.state));
        }
        if !self.sections.contains(&target) {
            return Err(InvalidTransition::UnknownSection(target));
        }

        let movement = if self.current_section == Some(target) {
            SectionMove::Unchanged
        } else if self.next_section() == Some(target) {
            SectionMove::Sequential
        } else {
            SectionMove::Jump
        };

        if movement != SectionMove::Unchanged {
            tracing::info!(
                session_id = %self.id,
                from = ?self.current_section,
                to = %target,
                movement = ?movement,
                "Section changed"
            );
        }
        self.current_section = Some(target);
        Ok(movement)
    }

    /// Append a violation against the current section. Does not change state.
    pub fn record_violation(
        &mut self,
        kind: ViolationKind,
    ) -> Result<&ViolationEvent, InvalidTransition> {
        let section_id = match (self.state, self.current_section) {
            (SessionState::Active, Some(section)) => section,
            (state, _) => return Err(InvalidTransition::NotActive(state)),
        };

        self.violations.push(ViolationEvent {
            kind,
            timestamp: Utc::now(),
            section_id,
        });
        tracing::warn!(
            session_id = %self.id,
            kind = %kind,
            section = %section_id,
            total = self.violations.len(),
            "Integrity violation recorded"
        );
        Ok(&self.violations[self.violations.len() - 1])
    }

    /// Complete the session.
    ///
    /// Returns `Ok(true)` for the call that performed the transition and
    /// `Ok(false)` when the session had already completed, so racing
    /// triggers (manual, timeout, escalation) are safe.
    pub fn end(&mut self, reason: EndReason) -> Result<bool, InvalidTransition> {
        match self.state {
            SessionState::Completed => Ok(false),
            SessionState::Inactive => Err(InvalidTransition::NotActive(self.state)),
            SessionState::Active => {
                self.state = SessionState::Completed;
                self.end_reason = Some(reason);
                self.ended_at = Some(Utc::now());
                tracing::info!(
                    session_id = %self.id,
                    reason = %reason,
                    violations = self.violations.len(),
                    "Exam session ended"
                );
                Ok(true)
            }
        }
    }

    /// The section after the current one in program order, if any.
    pub fn next_section(&self) -> Option<SectionId> {
        let current = self.current_section?;
        let position = self.sections.iter().position(|s| *s == current)?;
        self.sections.get(position + 1).copied()
    }

    /// Time left before `duration` runs out, measured from `started_at`.
    pub fn time_remaining(&self, duration: Duration, now: DateTime<Utc>) -> Option<Duration> {
        let started_at = self.started_at?;
        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
        Some(duration.saturating_sub(elapsed))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn sections(&self) -> &[SectionId] {
        &self.sections
    }

    pub fn current_section(&self) -> Option<SectionId> {
        self.current_section
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn violations(&self) -> &[ViolationEvent] {
        &self.violations
    }

    pub fn violation_summary(&self) -> ViolationSummary {
        ViolationSummary::from_events(&self.violations)
    }
}
