use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::exam::session::{EndReason, ExamSession, SectionId, ViolationEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    SectionCompleted,
    ExamCompleted,
}

impl std::fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionKind::SectionCompleted => f.pad("section_completed"),
            CompletionKind::ExamCompleted => f.pad("exam_completed"),
        }
    }
}

/// Persisted by the remote collaborator; the session itself stays authoritative
/// locally whether or not the command arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCommand {
    pub kind: CompletionKind,
    pub session_id: Uuid,
    pub candidate_id: String,
    pub job_id: u64,
    pub section_id: SectionId,
    /// Set on `ExamCompleted` only.
    pub reason: Option<EndReason>,
    pub violations: Vec<ViolationEvent>,
    pub issued_at: DateTime<Utc>,
}

impl CompletionCommand {
    /// Section submission, carrying the violations recorded in that section.
    pub fn section_completed(session: &ExamSession, section: SectionId) -> Self {
        Self {
            kind: CompletionKind::SectionCompleted,
            session_id: session.id(),
            candidate_id: session.candidate_id().to_string(),
            job_id: session.job_id(),
            section_id: section,
            reason: None,
            violations: session
                .violations()
                .iter()
                .filter(|v| v.section_id == section)
                .cloned()
                .collect(),
            issued_at: Utc::now(),
        }
    }

    /// Final report with the full audit trail. `None` until the session has ended.
    pub fn exam_completed(session: &ExamSession) -> Option<Self> {
        let reason = session.end_reason()?;
        let section_id = session.current_section()?;
        Some(Self {
            kind: CompletionKind::ExamCompleted,
            session_id: session.id(),
            candidate_id: session.candidate_id().to_string(),
            job_id: session.job_id(),
            section_id,
            reason: Some(reason),
            violations: session.violations().to_vec(),
            issued_at: Utc::now(),
        })
    }
}

/// Outbound command surface to the persistence collaborator.
pub trait CommandSink: Send + Sync + 'static {
    fn send(&self, command: CompletionCommand) -> impl Future<Output = Result<()>> + Send;
}

/// Forwards commands into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CompletionCommand>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CompletionCommand>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CompletionCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl CommandSink for ChannelSink {
    fn send(&self, command: CompletionCommand) -> impl Future<Output = Result<()>> + Send {
        let tx = self.tx.clone();
        async move {
            tx.send(command)
                .await
                .map_err(|_| SyncError::CommandDelivery("command receiver dropped".to_string()))
        }
    }
}

/// Send `command` in the background. Failures are logged and not retried.
pub fn dispatch<S: CommandSink>(sink: Arc<S>, command: CompletionCommand) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = command.kind;
        let session_id = command.session_id;
        let section = command.section_id;
        match sink.send(command).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, kind = %kind, section = %section, "Completion command sent");
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    kind = %kind,
                    section = %section,
                    error = %e,
                    "Completion command not delivered"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::session::ViolationKind;

    fn finished_session() -> ExamSession {
        let mut session = ExamSession::new("cand_9", 21);
        session
            .begin(vec![SectionId::Psychometric, SectionId::Coding])
            .unwrap();
        session.record_violation(ViolationKind::FocusLoss).unwrap();
        session.advance_section(SectionId::Coding).unwrap();
        session
            .record_violation(ViolationKind::VisibilityLoss)
            .unwrap();
        session.end(EndReason::Timeout).unwrap();
        session
    }

    #[test]
    fn test_section_command_filters_violations() {
        let session = finished_session();
        let cmd = CompletionCommand::section_completed(&session, SectionId::Psychometric);

        assert_eq!(cmd.kind, CompletionKind::SectionCompleted);
        assert_eq!(cmd.candidate_id, "cand_9");
        assert_eq!(cmd.job_id, 21);
        assert!(cmd.reason.is_none());
        assert_eq!(cmd.violations.len(), 1);
        assert_eq!(cmd.violations[0].kind, ViolationKind::FocusLoss);
    }

    #[test]
    fn test_exam_command_carries_full_trail() {
        let session = finished_session();
        let cmd = CompletionCommand::exam_completed(&session).unwrap();

        assert_eq!(cmd.kind, CompletionKind::ExamCompleted);
        assert_eq!(cmd.section_id, SectionId::Coding);
        assert_eq!(cmd.reason, Some(EndReason::Timeout));
        assert_eq!(cmd.violations.len(), 2);
    }

    #[test]
    fn test_exam_command_requires_end() {
        let mut session = ExamSession::new("cand_9", 21);
        session.begin(vec![SectionId::Coding]).unwrap();
        assert!(CompletionCommand::exam_completed(&session).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_delivers_through_channel() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let cmd = CompletionCommand::exam_completed(&finished_session()).unwrap();

        dispatch(Arc::new(sink), cmd.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(cmd));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let cmd = CompletionCommand::exam_completed(&finished_session()).unwrap();

        // The task logs the failure and completes normally.
        assert!(dispatch(Arc::new(sink), cmd).await.is_ok());
    }
}
