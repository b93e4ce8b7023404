use std::sync::Arc;

use osce_core::case::CaseKnowledge;
use osce_core::ids::{CaseId, SessionId, UserId};
use osce_core::session::{Session, SessionPatch, SessionStatus};

use crate::error::StoreError;

/// Persistent per-attempt session state.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    fn create(&self, user_id: &UserId, case_id: &CaseId) -> Result<Session, StoreError> {
        self.create_with_id(&SessionId::new(), user_id, case_id)
    }

    /// Create a session under a caller-chosen id. Fails with `Conflict` if
    /// the id is taken.
    fn create_with_id(
        &self,
        id: &SessionId,
        user_id: &UserId,
        case_id: &CaseId,
    ) -> Result<Session, StoreError>;

    /// Most recent active session of `user_id` on `case_id`.
    fn find_active(&self, user_id: &UserId, case_id: &CaseId) -> Result<Option<Session>, StoreError>;

    fn save(&self, id: &SessionId, patch: &SessionPatch) -> Result<(), StoreError>;

    fn archive(&self, id: &SessionId) -> Result<(), StoreError> {
        let patch = SessionPatch {
            status: Some(SessionStatus::Archived),
            ..Default::default()
        };
        self.save(id, &patch)
    }
}

/// Read-only scenario library.
pub trait CaseStore: Send + Sync {
    /// Load one case. A missing case is `StoreError::NotFound`.
    fn load(&self, case_id: &CaseId) -> Result<Arc<CaseKnowledge>, StoreError>;

    fn list(&self) -> Result<Vec<CaseId>, StoreError>;
}
