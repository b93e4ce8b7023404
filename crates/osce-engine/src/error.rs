use osce_core::ids::{CaseId, SessionId};
use osce_core::stage::StageName;
use osce_store::StoreError;

/// Failures surfaced to the transport layer.
///
/// Denials, repeats and generative outages are ordinary replies, not errors;
/// only request-shape and data-integrity problems end up here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("case not found: {0}")]
    CaseNotFound(CaseId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session {0} already has a message in flight")]
    SessionBusy(SessionId),

    #[error("session {0} is archived")]
    SessionArchived(SessionId),

    #[error("session {session_id} belongs to case {expected}, not {requested}")]
    CaseMismatch {
        session_id: SessionId,
        expected: CaseId,
        requested: CaseId,
    },

    #[error("message text is empty")]
    EmptyMessage,

    #[error("cannot move from {from} to {to}")]
    InvalidStageTransition { from: StageName, to: StageName },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::CaseNotFound(_) => "case_not_found",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionBusy(_) => "session_busy",
            Self::SessionArchived(_) => "session_archived",
            Self::CaseMismatch { .. } => "case_mismatch",
            Self::EmptyMessage => "empty_message",
            Self::InvalidStageTransition { .. } => "invalid_stage_transition",
            Self::Store(_) => "store",
        }
    }
}
