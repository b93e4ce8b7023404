use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use osce_core::generative::{Turn, TurnRole};
use osce_core::ids::{CaseId, SessionId, UserId};
use osce_core::intent::IntentCode;
use osce_core::session::{Session, SessionPatch, SessionStatus};
use osce_core::stage::StageName;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::traits::SessionStore;

const SESSION_COLUMNS: &str = "id, user_id, case_id, current_stage, completed_stages, revealed_intents,
     status, created_at, last_interaction_at";

/// SQLite-backed [`SessionStore`].
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of sessions, any status.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?))
    }
}

fn load_session(conn: &rusqlite::Connection, id: &SessionId) -> Result<Option<Session>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
    let mut rows = stmt.query([id.as_str()])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut session = row_to_session(row)?;
    session.transcript = load_transcript(conn, id)?;
    Ok(Some(session))
}

fn load_transcript(conn: &rusqlite::Connection, id: &SessionId) -> Result<Vec<Turn>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT role, text FROM transcript WHERE session_id = ?1 ORDER BY sequence")?;
    let mut rows = stmt.query([id.as_str()])?;
    let mut turns = Vec::new();
    while let Some(row) = rows.next()? {
        let role: String = row_helpers::get(row, 0, "transcript", "role")?;
        let role = match role.as_str() {
            "trainee" => TurnRole::Trainee,
            "patient" => TurnRole::Patient,
            other => {
                return Err(StoreError::CorruptRow {
                    table: "transcript",
                    column: "role",
                    detail: format!("unknown role: {other}"),
                })
            }
        };
        let text = row_helpers::get(row, 1, "transcript", "text")?;
        turns.push(Turn { role, text });
    }
    Ok(turns)
}

fn role_str(role: TurnRole) -> &'static str {
    match role {
        TurnRole::Trainee => "trainee",
        TurnRole::Patient => "patient",
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    const T: &str = "sessions";
    let id: String = row_helpers::get(row, 0, T, "id")?;
    let user_id: String = row_helpers::get(row, 1, T, "user_id")?;
    let case_id: String = row_helpers::get(row, 2, T, "case_id")?;
    let stage: String = row_helpers::get(row, 3, T, "current_stage")?;
    let completed: String = row_helpers::get(row, 4, T, "completed_stages")?;
    let revealed: String = row_helpers::get(row, 5, T, "revealed_intents")?;
    let status: String = row_helpers::get(row, 6, T, "status")?;
    let created_at: String = row_helpers::get(row, 7, T, "created_at")?;
    let last_interaction_at: String = row_helpers::get(row, 8, T, "last_interaction_at")?;

    Ok(Session {
        id: SessionId::from_raw(id),
        user_id: UserId::from_raw(user_id),
        case_id: CaseId::from_raw(case_id),
        current_stage: row_helpers::parse_enum::<StageName>(&stage, T, "current_stage")?,
        completed_stages: row_helpers::parse_json::<Vec<StageName>>(&completed, T, "completed_stages")?,
        revealed_intents: row_helpers::parse_json::<BTreeSet<IntentCode>>(&revealed, T, "revealed_intents")?,
        transcript: Vec::new(),
        status: SessionStatus::parse(&status).ok_or_else(|| StoreError::CorruptRow {
            table: T,
            column: "status",
            detail: format!("unknown variant: {status}"),
        })?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        last_interaction_at: row_helpers::parse_time(&last_interaction_at, T, "last_interaction_at")?,
    })
}

impl SessionStore for SessionRepo {
    #[instrument(skip(self), fields(session_id = %id))]
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| load_session(conn, id))
    }

    #[instrument(skip(self), fields(session_id = %id, user_id = %user_id, case_id = %case_id))]
    fn create_with_id(
        &self,
        id: &SessionId,
        user_id: &UserId,
        case_id: &CaseId,
    ) -> Result<Session, StoreError> {
        let session = Session::new(id.clone(), user_id.clone(), case_id.clone());
        let created = session.created_at.to_rfc3339();

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (id, user_id, case_id, current_stage, status, created_at, last_interaction_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    case_id.as_str(),
                    session.current_stage.as_str(),
                    created,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("session {id} already exists")));
            }
            debug!("session created");
            Ok(session)
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id, case_id = %case_id))]
    fn find_active(&self, user_id: &UserId, case_id: &CaseId) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM sessions
                     WHERE user_id = ?1 AND case_id = ?2 AND status = 'active'
                     ORDER BY last_interaction_at DESC LIMIT 1",
                    [user_id.as_str(), case_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => load_session(conn, &SessionId::from_raw(id)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self, patch), fields(session_id = %id, turns = patch.append_turns.len()))]
    fn save(&self, id: &SessionId, patch: &SessionPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut session =
                load_session(&tx, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
            let first_sequence = session.transcript.len();
            patch.apply(&mut session);

            tx.execute(
                "UPDATE sessions
                 SET current_stage = ?2, completed_stages = ?3, revealed_intents = ?4,
                     status = ?5, last_interaction_at = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id.as_str(),
                    session.current_stage.as_str(),
                    serde_json::to_string(&session.completed_stages)?,
                    serde_json::to_string(&session.revealed_intents)?,
                    session.status.as_str(),
                    session.last_interaction_at.to_rfc3339(),
                ],
            )?;

            let now = Utc::now().to_rfc3339();
            for (offset, turn) in patch.append_turns.iter().enumerate() {
                tx.execute(
                    "INSERT INTO transcript (session_id, sequence, role, text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        id.as_str(),
                        (first_sequence + offset) as i64,
                        role_str(turn.role),
                        turn.text,
                        now,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    fn ids() -> (UserId, CaseId) {
        (UserId::from_raw("trainee-1"), CaseId::from_raw("cp-01"))
    }

    #[test]
    fn create_and_load() {
        let repo = repo();
        let (user, case) = ids();
        let created = repo.create(&user, &case).unwrap();
        assert!(created.id.as_str().starts_with("sess_"));

        let loaded = repo.load(&created.id).unwrap().unwrap();
        assert_eq!(loaded.user_id, user);
        assert_eq!(loaded.case_id, case);
        assert_eq!(loaded.current_stage, StageName::History);
        assert!(loaded.revealed_intents.is_empty());
        assert!(loaded.is_active());
    }

    #[test]
    fn load_missing_is_none() {
        assert!(repo().load(&SessionId::from_raw("sess_nope")).unwrap().is_none());
    }

    #[test]
    fn create_with_taken_id_conflicts() {
        let repo = repo();
        let (user, case) = ids();
        let id = SessionId::from_raw("sess_fixed");
        repo.create_with_id(&id, &user, &case).unwrap();
        let err = repo.create_with_id(&id, &user, &case).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn save_accumulates_reveals_and_transcript() {
        let repo = repo();
        let (user, case) = ids();
        let session = repo.create(&user, &case).unwrap();

        repo.save(
            &session.id,
            &SessionPatch {
                reveal: [IntentCode::AskOnset].into(),
                append_turns: vec![Turn::trainee("When did it start?"), Turn::patient("This morning.")],
                ..Default::default()
            },
        )
        .unwrap();
        repo.save(
            &session.id,
            &SessionPatch {
                reveal: [IntentCode::AskAllergies].into(),
                append_turns: vec![Turn::trainee("Allergies?"), Turn::patient("No allergies.")],
                current_stage: Some(StageName::Examination),
                completed_stage: Some(StageName::History),
                ..Default::default()
            },
        )
        .unwrap();

        let loaded = repo.load(&session.id).unwrap().unwrap();
        assert_eq!(
            loaded.revealed_intents,
            [IntentCode::AskOnset, IntentCode::AskAllergies].into()
        );
        assert_eq!(loaded.transcript.len(), 4);
        assert_eq!(loaded.transcript[3], Turn::patient("No allergies."));
        assert_eq!(loaded.current_stage, StageName::Examination);
        assert_eq!(loaded.completed_stages, vec![StageName::History]);
    }

    #[test]
    fn save_unknown_session_fails() {
        let err = repo()
            .save(
                &SessionId::from_raw("sess_ghost"),
                &SessionPatch { reveal: [IntentCode::AskOnset].into(), ..Default::default() },
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn archive_hides_from_find_active() {
        let repo = repo();
        let (user, case) = ids();
        let session = repo.create(&user, &case).unwrap();
        assert_eq!(repo.find_active(&user, &case).unwrap().unwrap().id, session.id);

        repo.archive(&session.id).unwrap();
        assert!(repo.find_active(&user, &case).unwrap().is_none());
        let loaded = repo.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Archived);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
