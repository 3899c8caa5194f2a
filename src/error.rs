use thiserror::Error;

use crate::exam::session::{SectionId, SessionState};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Command delivery failed: {0}")]
    CommandDelivery(String),

    #[error("Invalid change envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A session operation requested from a state that does not accept it.
///
/// These are dropped and logged by the caller; they never interrupt an exam.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTransition {
    #[error("session must be inactive, it is {0}")]
    NotInactive(SessionState),

    #[error("session must be active, it is {0}")]
    NotActive(SessionState),

    #[error("cannot begin a session with no sections")]
    EmptySections,

    #[error("section {0} appears more than once")]
    DuplicateSection(SectionId),

    #[error("section {0} is not part of this session")]
    UnknownSection(SectionId),
}
