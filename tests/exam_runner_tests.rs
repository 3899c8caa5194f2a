//! Exam runner tests.
//!
//! These drive a full exam through its input channel and check the final
//! session along with the completion commands sent to the sink.


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use recruit_sync::config::{EscalationPolicy, ExamConfig};
use recruit_sync::exam::{
    CompletionKind, EndReason, ExamInput, ExamRunner, ExamSession, SessionState, Signal,
    ViolationKind,
};
use test_harness::{assert_eventually, FailingSink, RecordingSink};

use recruit_sync::exam::SectionId::{Coding as C, Psychometric as P, TechnicalText as T};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Visibility and focus losses count as soon as they are observed.
fn immediate() -> ExamConfig {
    ExamConfig::default().with_min_loss_duration(Duration::ZERO)
}

/// Spawn a runner over all three sections.
fn start(
    config: ExamConfig,
    sink: RecordingSink,
) -> (
    mpsc::Sender<ExamInput>,
    CancellationToken,
    tokio::task::JoinHandle<ExamSession>,
) {
    let (tx, rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let runner = ExamRunner::new(ExamSession::new("cand_42", 7), config, Arc::new(sink));
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { runner.run(vec![P, T, C], rx, token).await });
    (tx, shutdown, handle)
}

async fn wait_for_commands(sink: &RecordingSink, count: usize) {
    assert_eventually(
        || {
            let sink = sink.clone();
            async move { sink.commands().len() >= count }
        },
        TIMEOUT,
        "completion commands should be delivered",
    )
    .await;
}

#[tokio::test]
async fn test_escalation_auto_submits() {
    let sink = RecordingSink::new();
    let config = immediate().with_escalation(EscalationPolicy::ViolationCount { limit: 3 });
    let (tx, _shutdown, handle) = start(config, sink.clone());

    for _ in 0..3 {
        tx.send(Signal::VisibilityLost.into()).await.unwrap();
    }

    let session = handle.await.unwrap();
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.end_reason(), Some(EndReason::Escalated));
    assert_eq!(session.violations().len(), 3);

    wait_for_commands(&sink, 1).await;
    let exam = sink.of_kind(CompletionKind::ExamCompleted);
    assert_eq!(exam.len(), 1);
    assert_eq!(exam[0].reason, Some(EndReason::Escalated));
    assert_eq!(exam[0].violations.len(), 3);
}

#[tokio::test]
async fn test_severity_score_escalation() {
    let sink = RecordingSink::new();
    // Tab-switch attempts weigh more than focus loss.
    let config = immediate()
        .without_cooldowns()
        .with_escalation(EscalationPolicy::SeverityScore { limit: 4 });
    let (tx, _shutdown, handle) = start(config, sink.clone());

    tx.send(Signal::FocusLost.into()).await.unwrap();
    tx.send(Signal::NavigationDeclined { target: C }.into())
        .await
        .unwrap();
    tx.send(Signal::NavigationDeclined { target: C }.into())
        .await
        .unwrap();

    let session = handle.await.unwrap();
    assert_eq!(session.end_reason(), Some(EndReason::Escalated));
    assert_eq!(
        session
            .violations()
            .iter()
            .map(|v| v.kind)
            .collect::<Vec<_>>(),
        vec![
            ViolationKind::FocusLoss,
            ViolationKind::TabSwitchAttempt,
            ViolationKind::TabSwitchAttempt
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timer_expiry_ends_session() {
    let sink = RecordingSink::new();
    let config = immediate().with_duration(Duration::from_secs(30 * 60));
    let (tx, _shutdown, handle) = start(config, sink.clone());

    tx.send(Signal::VisibilityLost.into()).await.unwrap();

    let session = handle.await.unwrap();
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.end_reason(), Some(EndReason::Timeout));
    assert_eq!(session.violations().len(), 1);

    wait_for_commands(&sink, 1).await;
    assert_eq!(
        sink.of_kind(CompletionKind::ExamCompleted)[0].reason,
        Some(EndReason::Timeout)
    );
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn test_only_lasting_losses_are_recorded() {
    let sink = RecordingSink::new();
    let (tx, _shutdown, handle) = start(ExamConfig::default(), sink.clone());

    tx.send(Signal::VisibilityLost.into()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    tx.send(Signal::VisibilityRestored.into()).await.unwrap();

    tx.send(Signal::FocusLost.into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    tx.send(Signal::FocusRegained.into()).await.unwrap();

    tx.send(ExamInput::Submit).await.unwrap();

    let session = handle.await.unwrap();
    assert_eq!(
        session
            .violations()
            .iter()
            .map(|v| v.kind)
            .collect::<Vec<_>>(),
        vec![ViolationKind::VisibilityLoss]
    );
    assert_eq!(session.violation_summary().total, 1);
}

#[tokio::test]
async fn test_confirmed_navigation_submits_section_and_exam() {
    let sink = RecordingSink::new();
    let (tx, _shutdown, handle) = start(ExamConfig::default(), sink.clone());

    tx.send(Signal::NavigationRequested { target: C }.into())
        .await
        .unwrap();
    tx.send(Signal::NavigationConfirmed { target: C }.into())
        .await
        .unwrap();

    let session = handle.await.unwrap();
    assert_eq!(session.end_reason(), Some(EndReason::Completed));
    assert_eq!(session.current_section(), Some(P));
    assert!(session.violations().is_empty());

    // Section and exam commands are sent independently; order is not fixed.
    wait_for_commands(&sink, 2).await;
    let sections = sink.of_kind(CompletionKind::SectionCompleted);
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].section_id, P);
    assert_eq!(sink.of_kind(CompletionKind::ExamCompleted).len(), 1);
}

#[tokio::test]
async fn test_advance_submits_previous_section() {
    let sink = RecordingSink::new();
    let (tx, _shutdown, handle) = start(immediate(), sink.clone());

    tx.send(Signal::VisibilityLost.into()).await.unwrap();
    tx.send(ExamInput::Advance(T)).await.unwrap();
    tx.send(ExamInput::Advance(T)).await.unwrap();
    tx.send(ExamInput::Submit).await.unwrap();

    let session = handle.await.unwrap();
    assert_eq!(session.current_section(), Some(T));
    assert_eq!(session.end_reason(), Some(EndReason::Completed));

    wait_for_commands(&sink, 2).await;
    let sections = sink.of_kind(CompletionKind::SectionCompleted);
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].section_id, P);
    assert_eq!(sections[0].violations.len(), 1);

    let exam = sink.of_kind(CompletionKind::ExamCompleted);
    assert_eq!(exam[0].section_id, T);
}

#[tokio::test]
async fn test_shutdown_leaves_session_active() {
    let sink = RecordingSink::new();
    let (tx, shutdown, handle) = start(ExamConfig::default(), sink.clone());

    tx.send(Signal::VisibilityLost.into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let session = handle.await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.end_reason().is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sink.commands().is_empty());
}

#[tokio::test]
async fn test_inputs_after_completion_are_ignored() {
    let sink = RecordingSink::new();
    let (tx, _shutdown, handle) = start(ExamConfig::default(), sink.clone());

    tx.send(ExamInput::Submit).await.unwrap();
    let _ = tx.send(Signal::VisibilityLost.into()).await;
    let _ = tx.send(ExamInput::Advance(C)).await;

    let session = handle.await.unwrap();
    assert_eq!(session.state(), SessionState::Completed);
    assert!(session.violations().is_empty());
    assert_eq!(session.current_section(), Some(P));
}

#[tokio::test]
async fn test_subscribers_see_each_change() {
    let sink = RecordingSink::new();
    let (tx, rx) = mpsc::channel::<ExamInput>(16);
    let runner = ExamRunner::new(
        ExamSession::new("cand_42", 7),
        immediate(),
        Arc::new(sink),
    );
    let state = runner.subscribe();
    assert_eq!(state.borrow().state(), SessionState::Inactive);

    let handle = tokio::spawn(runner.run(vec![P, T, C], rx, CancellationToken::new()));

    tx.send(Signal::VisibilityLost.into()).await.unwrap();
    assert_eventually(
        || {
            let violations = state.borrow().violations().len();
            async move { violations == 1 }
        },
        TIMEOUT,
        "published session should carry the violation",
    )
    .await;
    assert!(state.borrow().is_active());

    tx.send(ExamInput::Submit).await.unwrap();
    handle.await.unwrap();
    assert_eq!(state.borrow().state(), SessionState::Completed);
}

#[tokio::test]
async fn test_delivery_failure_keeps_local_result() {
    let (tx, rx) = mpsc::channel::<ExamInput>(4);
    let runner = ExamRunner::new(
        ExamSession::new("cand_42", 7),
        ExamConfig::default(),
        Arc::new(FailingSink),
    );
    let handle = tokio::spawn(runner.run(vec![C], rx, CancellationToken::new()));

    tx.send(ExamInput::Submit).await.unwrap();
    let session = handle.await.unwrap();

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.end_reason(), Some(EndReason::Completed));
}

#[tokio::test]
async fn test_empty_program_never_starts() {
    let sink = RecordingSink::new();
    let (_tx, rx) = mpsc::channel::<ExamInput>(1);
    let runner = ExamRunner::new(
        ExamSession::new("cand_42", 7),
        ExamConfig::default(),
        Arc::new(sink.clone()),
    );

    let session = runner.run(Vec::new(), rx, CancellationToken::new()).await;

    assert_eq!(session.state(), SessionState::Inactive);
    assert!(sink.commands().is_empty());
}
