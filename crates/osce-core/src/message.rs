use serde::{Deserialize, Serialize};

use crate::ids::{CaseId, SessionId, UserId};
use crate::intent::IntentCode;

/// One trainee utterance as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub text: String,
    pub session_id: SessionId,
    pub case_id: CaseId,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>, session_id: SessionId, case_id: CaseId) -> Self {
        Self {
            text: text.into(),
            session_id,
            case_id,
            user_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Conversational,
    Unclear,
    Clinical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl Reply {
    pub fn conversational(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: Category::Conversational,
            intent: None,
            blocked: None,
        }
    }

    pub fn unclear(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: Category::Unclear,
            intent: None,
            blocked: None,
        }
    }

    pub fn clinical(text: impl Into<String>, intent: IntentCode) -> Self {
        Self {
            text: text.into(),
            category: Category::Clinical,
            intent: Some(intent),
            blocked: None,
        }
    }

    pub fn with_intent(mut self, intent: IntentCode) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = Some(true);
        self
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_message_wire_shape() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "text": "When did it start?",
            "sessionId": "sess_1",
            "caseId": "cp-01"
        }))
        .unwrap();
        assert_eq!(msg.session_id.as_str(), "sess_1");
        assert!(msg.user_id.is_none());
    }

    #[test]
    fn reply_omits_absent_fields() {
        let reply = Reply::unclear("Could you rephrase that?");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value, json!({ "text": "Could you rephrase that?", "category": "unclear" }));
    }

    #[test]
    fn blocked_clinical_reply() {
        let reply = Reply::clinical("Not yet.", IntentCode::RequestEcg).blocked();
        assert!(reply.is_blocked());
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["intent"], "REQUEST_ECG");
        assert_eq!(value["blocked"], true);
    }
}
