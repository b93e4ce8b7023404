//! In-process stores for tests and throwaway console runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use osce_core::case::CaseKnowledge;
use osce_core::ids::{CaseId, SessionId, UserId};
use osce_core::session::{Session, SessionPatch};

use crate::error::StoreError;
use crate::traits::{CaseStore, SessionStore};

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().get(id).cloned())
    }

    fn create_with_id(
        &self,
        id: &SessionId,
        user_id: &UserId,
        case_id: &CaseId,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(id) {
            return Err(StoreError::Conflict(format!("session {id} already exists")));
        }
        let session = Session::new(id.clone(), user_id.clone(), case_id.clone());
        sessions.insert(id.clone(), session.clone());
        Ok(session)
    }

    fn find_active(&self, user_id: &UserId, case_id: &CaseId) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .values()
            .filter(|s| s.is_active() && &s.user_id == user_id && &s.case_id == case_id)
            .max_by_key(|s| s.last_interaction_at)
            .cloned())
    }

    fn save(&self, id: &SessionId, patch: &SessionPatch) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        patch.apply(session);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<HashMap<CaseId, Arc<CaseKnowledge>>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case under the id in its metadata.
    pub fn insert(&self, case: CaseKnowledge) -> CaseId {
        let id = CaseId::from_raw(case.case_id());
        self.cases.write().insert(id.clone(), Arc::new(case));
        id
    }
}

impl CaseStore for InMemoryCaseStore {
    fn load(&self, case_id: &CaseId) -> Result<Arc<CaseKnowledge>, StoreError> {
        self.cases
            .read()
            .get(case_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("case {case_id}")))
    }

    fn list(&self) -> Result<Vec<CaseId>, StoreError> {
        let mut ids: Vec<CaseId> = self.cases.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osce_core::intent::IntentCode;
    use osce_core::session::SessionStatus;

    #[test]
    fn session_lifecycle() {
        let store = InMemorySessionStore::new();
        let user = UserId::anonymous();
        let case = CaseId::from_raw("cp-01");
        let session = store.create(&user, &case).unwrap();
        assert_eq!(store.len(), 1);

        store
            .save(
                &session.id,
                &SessionPatch { reveal: [IntentCode::AskOnset].into(), ..Default::default() },
            )
            .unwrap();
        let loaded = store.load(&session.id).unwrap().unwrap();
        assert!(loaded.revealed_intents.contains(&IntentCode::AskOnset));

        store.archive(&session.id).unwrap();
        assert_eq!(store.load(&session.id).unwrap().unwrap().status, SessionStatus::Archived);
        assert!(store.find_active(&user, &case).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_conflicts() {
        let store = InMemorySessionStore::new();
        let id = SessionId::from_raw("sess_1");
        store.create_with_id(&id, &UserId::anonymous(), &CaseId::from_raw("c")).unwrap();
        assert!(matches!(
            store.create_with_id(&id, &UserId::anonymous(), &CaseId::from_raw("c")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn case_store_lookup() {
        let store = InMemoryCaseStore::new();
        let mut case = CaseKnowledge::default();
        case.case_metadata.case_id = "cp-01".into();
        let id = store.insert(case);

        assert_eq!(store.load(&id).unwrap().case_id(), "cp-01");
        assert!(store.load(&CaseId::from_raw("missing")).unwrap_err().is_not_found());
        assert_eq!(store.list().unwrap(), vec![id]);
    }
}
