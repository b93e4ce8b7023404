use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::generative::Turn;
use crate::ids::{CaseId, SessionId, UserId};
use crate::intent::IntentCode;
use crate::stage::StageName;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Per-attempt exam state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub case_id: CaseId,
    pub current_stage: StageName,
    pub completed_stages: Vec<StageName>,
    pub revealed_intents: BTreeSet<IntentCode>,
    pub transcript: Vec<Turn>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, user_id: UserId, case_id: CaseId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            case_id,
            current_stage: StageName::History,
            completed_stages: Vec::new(),
            revealed_intents: BTreeSet::new(),
            transcript: Vec::new(),
            status: SessionStatus::Active,
            created_at: now,
            last_interaction_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Delta persisted after a turn or lifecycle event.
///
/// `reveal` and `append_turns` are additive: applying a patch can never
/// shrink the revealed set or rewrite earlier transcript turns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    pub current_stage: Option<StageName>,
    pub completed_stage: Option<StageName>,
    pub reveal: BTreeSet<IntentCode>,
    pub append_turns: Vec<Turn>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub status: Option<SessionStatus>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, session: &mut Session) {
        if let Some(stage) = self.current_stage {
            session.current_stage = stage;
        }
        if let Some(stage) = self.completed_stage {
            if !session.completed_stages.contains(&stage) {
                session.completed_stages.push(stage);
            }
        }
        session.revealed_intents.extend(self.reveal.iter().copied());
        session.transcript.extend(self.append_turns.iter().cloned());
        if let Some(at) = self.last_interaction_at {
            session.last_interaction_at = at;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
    }
}
