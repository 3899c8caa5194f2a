use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ExamConfig;
use crate::exam::command::{dispatch, CommandSink, CompletionCommand};
use crate::exam::monitor::{IntegrityMonitor, MonitorAction, Signal};
use crate::exam::session::{EndReason, ExamSession, SectionId, SectionMove};

/// Inputs the candidate's UI feeds into a running exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamInput {
    /// Environment or navigation signal for the integrity monitor.
    Signal(Signal),
    /// The candidate finished the current section and moves on in-exam.
    Advance(SectionId),
    /// Manual submission of the whole exam.
    Submit,
}

impl From<Signal> for ExamInput {
    fn from(signal: Signal) -> Self {
        ExamInput::Signal(signal)
    }
}

/// Drives one exam session until it completes.
///
/// The runner is the session's only writer. Inputs, the deadline timer and
/// the shutdown token are handled one at a time, so whichever trigger ends
/// the session first wins and later ones see a completed session.
pub struct ExamRunner<S> {
    session: ExamSession,
    monitor: IntegrityMonitor,
    config: ExamConfig,
    sink: Arc<S>,
    state_tx: watch::Sender<ExamSession>,
}

impl<S: CommandSink> ExamRunner<S> {
    pub fn new(session: ExamSession, config: ExamConfig, sink: Arc<S>) -> Self {
        let (state_tx, _) = watch::channel(session.clone());
        Self {
            monitor: IntegrityMonitor::new(&config),
            session,
            config,
            sink,
            state_tx,
        }
    }

    /// Latest session state, updated after every handled input.
    pub fn subscribe(&self) -> watch::Receiver<ExamSession> {
        self.state_tx.subscribe()
    }

    /// Begin the session on `sections` and process inputs until it completes,
    /// the input channel closes, or `shutdown` fires.
    ///
    /// Returns the session in its final state. An `ExamCompleted` command is
    /// dispatched when the session ended here.
    pub async fn run(
        mut self,
        sections: Vec<SectionId>,
        mut inputs: mpsc::Receiver<ExamInput>,
        shutdown: CancellationToken,
    ) -> ExamSession {
        if let Err(e) = self.session.begin(sections) {
            tracing::warn!(session_id = %self.session.id(), error = %e, "Exam session not started");
            return self.session;
        }
        self.monitor.attach(&self.session);
        self.publish();

        let deadline = self.config.duration.map(|d| Instant::now() + d);

        while self.session.is_active() {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(session_id = %self.session.id(), "Exam runner stopped by shutdown");
                    break;
                }
                _ = wait_until(deadline) => {
                    self.finish(EndReason::Timeout);
                }
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input),
                    None => {
                        tracing::info!(session_id = %self.session.id(), "Exam input closed");
                        break;
                    }
                },
            }
            self.publish();
        }

        if let Some(command) = CompletionCommand::exam_completed(&self.session) {
            dispatch(self.sink.clone(), command);
        }
        self.monitor.detach();
        self.session
    }

    fn handle(&mut self, input: ExamInput) {
        match input {
            ExamInput::Signal(signal) => {
                let action = self.monitor.observe(&mut self.session, signal);
                tracing::debug!(session_id = %self.session.id(), signal = ?signal, action = ?action, "Signal handled");
                if let MonitorAction::SectionSubmitted { section, .. } = action {
                    self.send_section(section);
                }
            }
            ExamInput::Advance(target) => {
                let Some(previous) = self.session.current_section() else {
                    return;
                };
                match self.session.advance_section(target) {
                    Ok(SectionMove::Unchanged) => {}
                    Ok(SectionMove::Sequential | SectionMove::Jump) => self.send_section(previous),
                    Err(e) => {
                        tracing::warn!(session_id = %self.session.id(), error = %e, "Section change dropped");
                    }
                }
            }
            ExamInput::Submit => self.finish(EndReason::Completed),
        }
    }

    fn finish(&mut self, reason: EndReason) {
        match self.session.end(reason) {
            Ok(_) => self.monitor.detach(),
            Err(e) => {
                tracing::warn!(session_id = %self.session.id(), error = %e, "End request dropped");
            }
        }
    }

    fn send_section(&self, section: SectionId) {
        let command = CompletionCommand::section_completed(&self.session, section);
        dispatch(self.sink.clone(), command);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.clone());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
