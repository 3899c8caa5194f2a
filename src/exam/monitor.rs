use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{EscalationPolicy, ExamConfig};
use crate::exam::guard::{NavigationDecision, NavigationGuard};
use crate::exam::session::{EndReason, ExamSession, SectionId, ViolationKind};

/// Environment and navigation signals observed during an exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// The document became hidden.
    VisibilityLost,
    /// The document became visible again.
    VisibilityRestored,
    /// The window lost focus.
    FocusLost,
    /// The window got focus back.
    FocusRegained,
    /// The candidate asked to open `target`; no prompt has been shown yet.
    NavigationRequested { target: SectionId },
    /// The candidate accepted the prompt. Leaving submits the current section.
    NavigationConfirmed { target: SectionId },
    /// The candidate dismissed the prompt and stays.
    NavigationDeclined { target: SectionId },
}

/// What the monitor did with one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Monitor detached or session not active.
    Ignored,
    /// Same kind recorded within its cooldown window.
    Suppressed(ViolationKind),
    /// A loss started; it is judged when the matching restore arrives.
    Pending(ViolationKind),
    /// The loss ended before the minimum duration and is not recorded.
    Dismissed(ViolationKind),
    Recorded { kind: ViolationKind, total: usize },
    /// The escalation policy ended the session.
    Escalated { total: usize },
    /// Navigation needs no confirmation.
    Allowed(SectionId),
    /// The UI must ask the candidate before leaving for the target.
    ConfirmationRequired(SectionId),
    /// A confirmed navigation submitted `section` and ended the session.
    SectionSubmitted { section: SectionId, destination: SectionId },
}

/// Watches an active exam session and turns signals into session changes.
///
/// Visibility and focus losses are held until their restore signal and
/// recorded only when they lasted at least `min_loss_duration`. Navigation
/// goes through the
/// [`NavigationGuard`]: a confirmed move to another section ends the session
/// as a deliberate submission, a declined one is kept as a tab-switch attempt.
/// The monitor detaches once the session completes and ignores anything
/// arriving after that.
#[derive(Debug)]
pub struct IntegrityMonitor {
    guard: NavigationGuard,
    escalation: EscalationPolicy,
    cooldowns: HashMap<ViolationKind, Duration>,
    min_loss_duration: Duration,
    last_recorded: HashMap<ViolationKind, Instant>,
    /// Start of each loss still waiting for its restore signal.
    pending_losses: HashMap<ViolationKind, Instant>,
    attached: bool,
}

impl IntegrityMonitor {
    pub fn new(config: &ExamConfig) -> Self {
        Self {
            guard: NavigationGuard::new(),
            escalation: config.escalation,
            cooldowns: config.cooldowns.clone(),
            min_loss_duration: config.min_loss_duration,
            last_recorded: HashMap::new(),
            pending_losses: HashMap::new(),
            attached: false,
        }
    }

    /// Start observing. Only attaches to an active session.
    pub fn attach(&mut self, session: &ExamSession) -> bool {
        if !session.is_active() {
            tracing::warn!(
                session_id = %session.id(),
                state = %session.state(),
                "Monitor not attached to inactive session"
            );
            return false;
        }
        self.attached = true;
        self.last_recorded.clear();
        self.pending_losses.clear();
        tracing::debug!(session_id = %session.id(), "Integrity monitor attached");
        true
    }

    pub fn detach(&mut self) {
        if self.attached {
            tracing::debug!(pending = self.pending_losses.len(), "Integrity monitor detached");
        }
        self.attached = false;
        self.pending_losses.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn observe(&mut self, session: &mut ExamSession, signal: Signal) -> MonitorAction {
        self.observe_at(session, signal, Instant::now())
    }

    pub fn observe_at(
        &mut self,
        session: &mut ExamSession,
        signal: Signal,
        now: Instant,
    ) -> MonitorAction {
        if !self.attached {
            tracing::debug!(signal = ?signal, "Signal after detach ignored");
            return MonitorAction::Ignored;
        }
        if !session.is_active() {
            self.detach();
            return MonitorAction::Ignored;
        }

        match signal {
            Signal::VisibilityLost => {
                self.loss_started(session, ViolationKind::VisibilityLoss, now)
            }
            Signal::VisibilityRestored => {
                self.loss_ended(session, ViolationKind::VisibilityLoss, now)
            }
            Signal::FocusLost => self.loss_started(session, ViolationKind::FocusLoss, now),
            Signal::FocusRegained => self.loss_ended(session, ViolationKind::FocusLoss, now),
            Signal::NavigationRequested { target } => match self.guard.decide(session, target) {
                NavigationDecision::Allow => MonitorAction::Allowed(target),
                NavigationDecision::Confirm | NavigationDecision::Deny => {
                    MonitorAction::ConfirmationRequired(target)
                }
            },
            Signal::NavigationDeclined { target } => match self.guard.decide(session, target) {
                NavigationDecision::Allow => MonitorAction::Allowed(target),
                NavigationDecision::Confirm | NavigationDecision::Deny => {
                    self.record(session, ViolationKind::TabSwitchAttempt, now)
                }
            },
            Signal::NavigationConfirmed { target } => match self.guard.decide(session, target) {
                NavigationDecision::Allow => MonitorAction::Allowed(target),
                NavigationDecision::Confirm | NavigationDecision::Deny => {
                    self.submit_for_navigation(session, target)
                }
            },
        }
    }

    fn loss_started(
        &mut self,
        session: &mut ExamSession,
        kind: ViolationKind,
        now: Instant,
    ) -> MonitorAction {
        if self.min_loss_duration.is_zero() {
            return self.record(session, kind, now);
        }
        // A repeated loss signal keeps the earliest start.
        self.pending_losses.entry(kind).or_insert(now);
        MonitorAction::Pending(kind)
    }

    fn loss_ended(
        &mut self,
        session: &mut ExamSession,
        kind: ViolationKind,
        now: Instant,
    ) -> MonitorAction {
        let Some(started) = self.pending_losses.remove(&kind) else {
            return MonitorAction::Ignored;
        };
        let lasted = now.saturating_duration_since(started);
        if lasted < self.min_loss_duration {
            tracing::debug!(
                session_id = %session.id(),
                kind = %kind,
                lasted_ms = lasted.as_millis() as u64,
                "Loss shorter than minimum dismissed"
            );
            return MonitorAction::Dismissed(kind);
        }
        self.record(session, kind, now)
    }

    fn submit_for_navigation(
        &mut self,
        session: &mut ExamSession,
        destination: SectionId,
    ) -> MonitorAction {
        let Some(section) = session.current_section() else {
            return MonitorAction::Ignored;
        };
        match session.end(EndReason::Completed) {
            Ok(_) => {
                self.detach();
                tracing::info!(
                    session_id = %session.id(),
                    section = %section,
                    destination = %destination,
                    "Section submitted by confirmed navigation"
                );
                MonitorAction::SectionSubmitted {
                    section,
                    destination,
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Navigation submit dropped");
                MonitorAction::Ignored
            }
        }
    }

    fn record(
        &mut self,
        session: &mut ExamSession,
        kind: ViolationKind,
        now: Instant,
    ) -> MonitorAction {
        if let (Some(window), Some(last)) = (self.cooldowns.get(&kind), self.last_recorded.get(&kind)) {
            if now.saturating_duration_since(*last) < *window {
                tracing::debug!(session_id = %session.id(), kind = %kind, "Violation within cooldown suppressed");
                return MonitorAction::Suppressed(kind);
            }
        }

        if let Err(e) = session.record_violation(kind) {
            tracing::warn!(session_id = %session.id(), kind = %kind, error = %e, "Violation dropped");
            return MonitorAction::Ignored;
        }
        self.last_recorded.insert(kind, now);
        let total = session.violations().len();

        if self.escalation.should_escalate(session.violations()) {
            if let Ok(true) = session.end(EndReason::Escalated) {
                tracing::warn!(
                    session_id = %session.id(),
                    violations = total,
                    policy = ?self.escalation,
                    "Violation threshold reached, session auto-submitted"
                );
            }
            self.detach();
            return MonitorAction::Escalated { total };
        }

        MonitorAction::Recorded { kind, total }
    }
}
