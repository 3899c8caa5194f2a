//! Proctored exam sessions.
//!
//! - [`ExamSession`]: the `Inactive -> Active -> Completed` state machine with
//!   its append-only violation trail
//! - [`NavigationGuard`]: allow / confirm decisions for section changes
//! - [`IntegrityMonitor`]: turns visibility, focus and navigation signals into
//!   violations, submissions and escalations
//! - [`ExamRunner`]: async driver owning the session, the deadline timer and
//!   the outbound completion commands
//!
//! Local transitions are synchronous. Only sending a completion command
//! crosses an async boundary, and it is fire-and-forget.

pub mod command;
pub mod guard;
pub mod monitor;
pub mod runner;
pub mod session;

pub use command::{ChannelSink, CommandSink, CompletionCommand, CompletionKind};
pub use guard::{NavigationDecision, NavigationGuard};
pub use monitor::{IntegrityMonitor, MonitorAction, Signal};
pub use runner::{ExamInput, ExamRunner};
pub use session::{
    EndReason, ExamSession, SectionId, SectionMove, SessionState, Severity, ViolationEvent,
    ViolationKind, ViolationSummary,
};
