use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exam::session::{ViolationEvent, ViolationKind};

/// Reconnect behaviour for feed subscriptions.
///
/// Retries are unbounded. `lost_after_attempts` only controls when the
/// connection status flips to `Lost`, the user-visible "connection lost"
/// indicator.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Delay before the first reconnect attempt
    pub reconnect_initial_ms: u64,
    /// Upper bound on the reconnect delay
    pub reconnect_max_ms: u64,
    /// Consecutive failed attempts before reporting the connection as lost
    pub lost_after_attempts: u32,
    /// A connection that delivers nothing counts as failed until it has been
    /// up this long
    pub stable_after_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 250,
            reconnect_max_ms: 10_000,
            lost_after_attempts: 5,
            stable_after_ms: 5_000,
        }
    }
}

impl FeedConfig {
    pub fn with_reconnect(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.reconnect_initial_ms = initial_ms;
        self.reconnect_max_ms = max_ms.max(initial_ms);
        self
    }

    pub fn with_lost_after(mut self, attempts: u32) -> Self {
        self.lost_after_attempts = attempts;
        self
    }

    pub fn with_stable_after(mut self, stable_after_ms: u64) -> Self {
        self.stable_after_ms = stable_after_ms;
        self
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }
}

/// When repeated violations auto-submit a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Violations are recorded for the audit trail only.
    #[default]
    Disabled,

    /// Escalate once the session holds `limit` violations.
    ViolationCount { limit: u32 },

    /// Escalate once the summed severity weight reaches `limit`.
    SeverityScore { limit: u32 },
}

impl EscalationPolicy {
    pub fn should_escalate(&self, violations: &[ViolationEvent]) -> bool {
        match *self {
            EscalationPolicy::Disabled => false,
            EscalationPolicy::ViolationCount { limit } => {
                limit > 0 && violations.len() >= limit as usize
            }
            EscalationPolicy::SeverityScore { limit } => {
                let score: u32 = violations.iter().map(|v| v.kind.severity().weight()).sum();
                limit > 0 && score >= limit
            }
        }
    }
}

/// Settings for one proctored exam run.
#[derive(Debug, Clone)]
pub struct ExamConfig {
    /// Time limit measured from `begin`. `None` disables the timer.
    pub duration: Option<Duration>,
    pub escalation: EscalationPolicy,
    /// Minimum spacing between two recorded violations of the same kind.
    /// Signals arriving inside the window are suppressed.
    pub cooldowns: HashMap<ViolationKind, Duration>,
    /// A visibility or focus loss is recorded only if it lasts at least this
    /// long, measured from the loss signal to its restore signal. Zero
    /// records every loss as soon as it is observed.
    pub min_loss_duration: Duration,
}

impl Default for ExamConfig {
    fn default() -> Self {
        let mut cooldowns = HashMap::new();
        cooldowns.insert(ViolationKind::FocusLoss, Duration::from_secs(3));

        Self {
            duration: None,
            escalation: EscalationPolicy::Disabled,
            cooldowns,
            min_loss_duration: Duration::from_secs(2),
        }
    }
}

impl ExamConfig {
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_cooldown(mut self, kind: ViolationKind, window: Duration) -> Self {
        if window.is_zero() {
            self.cooldowns.remove(&kind);
        } else {
            self.cooldowns.insert(kind, window);
        }
        self
    }

    pub fn with_min_loss_duration(mut self, duration: Duration) -> Self {
        self.min_loss_duration = duration;
        self
    }

    pub fn without_cooldowns(mut self) -> Self {
        self.cooldowns.clear();
        self
    }

    pub fn cooldown(&self, kind: ViolationKind) -> Option<Duration> {
        self.cooldowns.get(&kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::session::SectionId;
    use chrono::Utc;

    fn violations(kinds: &[ViolationKind]) -> Vec<ViolationEvent> {
        kinds
            .iter()
            .map(|kind| ViolationEvent {
                kind: *kind,
                timestamp: Utc::now(),
                section_id: SectionId::Coding,
            })
            .collect()
    }

    #[test]
    fn feed_config_default() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.reconnect_initial_ms, 250);
        assert_eq!(cfg.reconnect_max_ms, 10_000);
        assert_eq!(cfg.lost_after_attempts, 5);
        assert_eq!(cfg.stable_after(), Duration::from_secs(5));
    }

    #[test]
    fn feed_config_reconnect_max_never_below_initial() {
        let cfg = FeedConfig::default().with_reconnect(500, 100);
        assert_eq!(cfg.reconnect_initial_ms, 500);
        assert_eq!(cfg.reconnect_max_ms, 500);
    }

    #[test]
    fn exam_config_default() {
        let cfg = ExamConfig::default();
        assert!(cfg.duration.is_none());
        assert_eq!(cfg.escalation, EscalationPolicy::Disabled);
        assert_eq!(
            cfg.cooldown(ViolationKind::FocusLoss),
            Some(Duration::from_secs(3))
        );
        assert!(cfg.cooldown(ViolationKind::VisibilityLoss).is_none());
        assert_eq!(cfg.min_loss_duration, Duration::from_secs(2));
    }

    #[test]
    fn exam_config_zero_cooldown_removes_entry() {
        let cfg = ExamConfig::default()
            .with_cooldown(ViolationKind::FocusLoss, Duration::ZERO)
            .with_cooldown(ViolationKind::TabSwitchAttempt, Duration::from_secs(1));
        assert!(cfg.cooldown(ViolationKind::FocusLoss).is_none());
        assert_eq!(
            cfg.cooldown(ViolationKind::TabSwitchAttempt),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn disabled_policy_never_escalates() {
        let many = violations(&[ViolationKind::VisibilityLoss; 50]);
        assert!(!EscalationPolicy::Disabled.should_escalate(&many));
    }

    #[test]
    fn violation_count_policy() {
        let policy = EscalationPolicy::ViolationCount { limit: 3 };
        assert!(!policy.should_escalate(&violations(&[ViolationKind::FocusLoss; 2])));
        assert!(policy.should_escalate(&violations(&[ViolationKind::FocusLoss; 3])));
    }

    #[test]
    fn severity_score_policy() {
        let policy = EscalationPolicy::SeverityScore { limit: 5 };
        // 2 + 2 = 4
        assert!(!policy.should_escalate(&violations(&[
            ViolationKind::VisibilityLoss,
            ViolationKind::TabSwitchAttempt,
        ])));
        // 2 + 2 + 1 = 5
        assert!(policy.should_escalate(&violations(&[
            ViolationKind::VisibilityLoss,
            ViolationKind::TabSwitchAttempt,
            ViolationKind::FocusLoss,
        ])));
    }

    #[test]
    fn zero_limit_is_treated_as_disabled() {
        let many = violations(&[ViolationKind::VisibilityLoss; 4]);
        assert!(!EscalationPolicy::ViolationCount { limit: 0 }.should_escalate(&many));
        assert!(!EscalationPolicy::SeverityScore { limit: 0 }.should_escalate(&many));
    }

    #[test]
    fn escalation_policy_serde_tagged() {
        let policy: EscalationPolicy =
            serde_json::from_str(r#"{"type":"violation_count","limit":5}"#).unwrap();
        assert_eq!(policy, EscalationPolicy::ViolationCount { limit: 5 });

        let json = serde_json::to_string(&EscalationPolicy::Disabled).unwrap();
        assert_eq!(json, r#"{"type":"disabled"}"#);
    }
}
