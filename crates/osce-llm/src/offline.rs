use async_trait::async_trait;

use osce_core::errors::GatewayError;
use osce_core::generative::{ConversationContext, GenerativeBackend, Turn};

/// Backend used when no generative endpoint is configured. Every call fails
/// with [`GatewayError::Unavailable`], which routes the classifier to its rule
/// cascade and response generation straight to its offline tier.
#[derive(Clone, Debug, Default)]
pub struct OfflineBackend;

#[async_trait]
impl GenerativeBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn is_offline(&self) -> bool {
        true
    }

    async fn create_context(
        &self,
        _framing: &str,
        _prior_turns: &[Turn],
    ) -> Result<ConversationContext, GatewayError> {
        Err(GatewayError::Unavailable("no generative endpoint configured".into()))
    }

    async fn send_once_stateless(&self, _framing: &str, _text: &str) -> Result<String, GatewayError> {
        Err(GatewayError::Unavailable("no generative endpoint configured".into()))
    }
}
