//! Seam to the external generative text service.
//!
//! A backend hands out [`ConversationContext`]s: opaque multi-turn exchanges
//! that own their history and a framing prompt fixed at creation. Closing is
//! explicit via [`ConversationContext::close`] and also happens on drop, so
//! an evicted cache entry releases its upstream session without a finaliser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Trainee,
    Patient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn trainee(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Trainee, text: text.into() }
    }

    pub fn patient(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Patient, text: text.into() }
    }
}

/// Backend-specific half of a conversation context.
#[async_trait]
pub trait ChatSession: Send {
    /// Send one trainee message and return the reply. Implementations record
    /// both turns in their history only when the call succeeds.
    async fn send(&mut self, text: &str) -> Result<String, GatewayError>;

    fn history(&self) -> &[Turn];

    /// Release upstream resources. Called at most once.
    fn close(&mut self) {}
}

pub struct ConversationContext {
    framing: String,
    inner: Option<Box<dyn ChatSession>>,
}

impl ConversationContext {
    pub fn new(framing: impl Into<String>, inner: Box<dyn ChatSession>) -> Self {
        Self {
            framing: framing.into(),
            inner: Some(inner),
        }
    }

    pub fn framing(&self) -> &str {
        &self.framing
    }

    pub async fn send(&mut self, text: &str) -> Result<String, GatewayError> {
        let session = self.inner.as_mut().ok_or(GatewayError::ContextClosed)?;
        session.send(text).await
    }

    pub fn history(&self) -> &[Turn] {
        self.inner.as_ref().map(|s| s.history()).unwrap_or(&[])
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn close(&mut self) {
        if let Some(mut session) = self.inner.take() {
            session.close();
        }
    }
}

impl Drop for ConversationContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("turns", &self.history().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A generative text service.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// True for a backend that fails every call by construction. Callers
    /// skip it instead of logging a failure per request.
    fn is_offline(&self) -> bool {
        false
    }

    /// Open a stateful exchange seeded with `prior_turns`.
    async fn create_context(
        &self,
        framing: &str,
        prior_turns: &[Turn],
    ) -> Result<ConversationContext, GatewayError>;

    /// One-shot call with no retained history.
    async fn send_once_stateless(&self, framing: &str, text: &str) -> Result<String, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        turns: Vec<Turn>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatSession for CountingSession {
        async fn send(&mut self, text: &str) -> Result<String, GatewayError> {
            let reply = format!("echo: {text}");
            self.turns.push(Turn::trainee(text));
            self.turns.push(Turn::patient(reply.clone()));
            Ok(reply)
        }

        fn history(&self) -> &[Turn] {
            &self.turns
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(closed: &Arc<AtomicUsize>) -> ConversationContext {
        ConversationContext::new(
            "You are a patient.",
            Box::new(CountingSession { turns: Vec::new(), closed: closed.clone() }),
        )
    }

    #[tokio::test]
    async fn send_records_history() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(&closed);
        let reply = ctx.send("hello").await.unwrap();
        assert_eq!(reply, "echo: hello");
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.framing(), "You are a patient.");
    }

    #[tokio::test]
    async fn closed_context_rejects_sends() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(&closed);
        ctx.close();
        assert!(ctx.is_closed());
        assert!(ctx.history().is_empty());
        assert!(matches!(ctx.send("hi").await, Err(GatewayError::ContextClosed)));
    }

    #[test]
    fn drop_closes_exactly_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(&closed);
        ctx.close();
        drop(ctx);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let ctx = context(&closed);
        drop(ctx);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}
