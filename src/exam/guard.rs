use crate::exam::session::{ExamSession, SectionId, SessionState};

/// Outcome of a requested section change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    /// The candidate must acknowledge that leaving submits the current section.
    Confirm,
    /// Never produced by [`NavigationGuard::decide`].
    Deny,
}

/// Gates section changes on the state of the exam session.
///
/// Leaving is never hard-blocked: during an active session, moving to a
/// different section asks for confirmation instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationGuard;

impl NavigationGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(&self, session: &ExamSession, destination: SectionId) -> NavigationDecision {
        if session.state() != SessionState::Active {
            return NavigationDecision::Allow;
        }
        if session.current_section() == Some(destination) {
            return NavigationDecision::Allow;
        }
        NavigationDecision::Confirm
    }
}
