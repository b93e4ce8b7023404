use async_trait::async_trait;

use osce_core::case::CaseKnowledge;
use osce_core::intent::IntentCode;

/// Fact text after tone annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledText {
    pub text: String,
    pub emotion: String,
}

/// Hook for colouring canonical fact text with the patient's emotional tone.
#[async_trait]
pub trait StyleMapper: Send + Sync {
    async fn map(&self, text: &str, intent: IntentCode, case: &CaseKnowledge) -> StyledText;
}

/// Returns the text unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughMapper;

#[async_trait]
impl StyleMapper for PassthroughMapper {
    async fn map(&self, text: &str, _intent: IntentCode, _case: &CaseKnowledge) -> StyledText {
        StyledText {
            text: text.to_owned(),
            emotion: "neutral".to_owned(),
        }
    }
}
