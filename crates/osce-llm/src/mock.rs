use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use osce_core::errors::GatewayError;
use osce_core::generative::{ChatSession, ConversationContext, GenerativeBackend, Turn};

/// Pre-programmed replies for deterministic testing without network calls.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(GatewayError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    async fn resolve(self) -> Result<String, GatewayError> {
        let mut reply = self;
        loop {
            match reply {
                Self::Text(text) => return Ok(text),
                Self::Error(err) => return Err(err),
                Self::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// A queue of replies consumed in order. Running dry yields an error so a
/// test that under-scripts a backend fails loudly.
#[derive(Default)]
struct Script {
    label: &'static str,
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl Script {
    fn new(label: &'static str, replies: Vec<MockReply>) -> Self {
        Self {
            label,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, input: &str) -> MockReply {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed);
        self.inputs.lock().push(input.to_owned());
        self.replies.lock().pop_front().unwrap_or_else(|| {
            MockReply::Error(GatewayError::InvalidRequest(format!(
                "MockBackend: no {} reply configured for call {idx}",
                self.label
            )))
        })
    }
}

/// Mock backend that serves scripted replies.
///
/// Stateful sends from every context it creates draw from one shared queue;
/// stateless calls draw from a second queue.
pub struct MockBackend {
    context_script: Arc<Script>,
    stateless_script: Script,
    create_failure: Option<GatewayError>,
    contexts_created: AtomicUsize,
    contexts_closed: Arc<AtomicUsize>,
    framings: Mutex<Vec<String>>,
    stateless_framings: Mutex<Vec<String>>,
    prior_turns: Mutex<Vec<Vec<Turn>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            context_script: Arc::new(Script::new("context", Vec::new())),
            stateless_script: Script::new("stateless", Vec::new()),
            create_failure: None,
            contexts_created: AtomicUsize::new(0),
            contexts_closed: Arc::new(AtomicUsize::new(0)),
            framings: Mutex::new(Vec::new()),
            stateless_framings: Mutex::new(Vec::new()),
            prior_turns: Mutex::new(Vec::new()),
        }
    }

    /// A backend on which every operation fails with `error`.
    pub fn failing(error: GatewayError) -> Self {
        Self::new().with_context_failure(error)
    }

    pub fn with_context_replies(mut self, replies: Vec<MockReply>) -> Self {
        self.context_script = Arc::new(Script::new("context", replies));
        self
    }

    pub fn with_stateless_replies(mut self, replies: Vec<MockReply>) -> Self {
        self.stateless_script = Script::new("stateless", replies);
        self
    }

    pub fn with_context_failure(mut self, error: GatewayError) -> Self {
        self.create_failure = Some(error);
        self
    }

    pub fn context_calls(&self) -> usize {
        self.context_script.calls.load(Ordering::Relaxed)
    }

    pub fn stateless_calls(&self) -> usize {
        self.stateless_script.calls.load(Ordering::Relaxed)
    }

    pub fn stateless_inputs(&self) -> Vec<String> {
        self.stateless_script.inputs.lock().clone()
    }

    pub fn context_inputs(&self) -> Vec<String> {
        self.context_script.inputs.lock().clone()
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::Relaxed)
    }

    pub fn contexts_closed(&self) -> usize {
        self.contexts_closed.load(Ordering::Relaxed)
    }

    pub fn framings(&self) -> Vec<String> {
        self.framings.lock().clone()
    }

    /// Framing passed to each `send_once_stateless` call, in order.
    pub fn stateless_framings(&self) -> Vec<String> {
        self.stateless_framings.lock().clone()
    }

    /// Prior turns passed to each `create_context` call, in order.
    pub fn prior_turns(&self) -> Vec<Vec<Turn>> {
        self.prior_turns.lock().clone()
    }
}

struct MockChatSession {
    script: Arc<Script>,
    turns: Vec<Turn>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatSession for MockChatSession {
    async fn send(&mut self, text: &str) -> Result<String, GatewayError> {
        let reply = self.script.next(text).resolve().await?;
        self.turns.push(Turn::trainee(text));
        self.turns.push(Turn::patient(reply.clone()));
        Ok(reply)
    }

    fn history(&self) -> &[Turn] {
        &self.turns
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_context(
        &self,
        framing: &str,
        prior_turns: &[Turn],
    ) -> Result<ConversationContext, GatewayError> {
        if let Some(err) = &self.create_failure {
            return Err(err.clone());
        }
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
        self.framings.lock().push(framing.to_owned());
        self.prior_turns.lock().push(prior_turns.to_vec());

        let session = MockChatSession {
            script: self.context_script.clone(),
            turns: prior_turns.to_vec(),
            closed: self.contexts_closed.clone(),
        };
        Ok(ConversationContext::new(framing, Box::new(session)))
    }

    async fn send_once_stateless(&self, framing: &str, text: &str) -> Result<String, GatewayError> {
        self.stateless_framings.lock().push(framing.to_owned());
        if let Some(err) = &self.create_failure {
            self.stateless_script.next(text);
            return Err(err.clone());
        }
        self.stateless_script.next(text).resolve().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_sequence() {
        let backend = MockBackend::new().with_context_replies(vec![
            MockReply::text("It started this morning."),
            MockReply::text("About two hours."),
        ]);
        let mut ctx = backend.create_context("framing", &[]).await.unwrap();

        assert_eq!(ctx.send("When did it start?").await.unwrap(), "It started this morning.");
        assert_eq!(ctx.send("How long?").await.unwrap(), "About two hours.");
        assert_eq!(backend.context_calls(), 2);
        assert_eq!(ctx.history().len(), 4);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let backend = MockBackend::new();
        let err = backend.send_once_stateless("framing", "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(msg) if msg.contains("no stateless reply")));
    }

    #[tokio::test]
    async fn failed_send_keeps_history_clean() {
        let backend = MockBackend::new()
            .with_context_replies(vec![MockReply::Error(GatewayError::EmptyResponse)]);
        let mut ctx = backend.create_context("framing", &[Turn::trainee("hello")]).await.unwrap();
        assert!(ctx.send("anything?").await.is_err());
        assert_eq!(ctx.history(), &[Turn::trainee("hello")]);
    }

    #[tokio::test]
    async fn failing_backend_rejects_everything() {
        let backend = MockBackend::failing(GatewayError::NetworkError("down".into()));
        assert!(backend.create_context("framing", &[]).await.is_err());
        assert!(backend.send_once_stateless("framing", "hi").await.is_err());
        assert_eq!(backend.contexts_created(), 0);
        assert_eq!(backend.stateless_calls(), 1);
    }

    #[tokio::test]
    async fn dropping_context_counts_close() {
        let backend = MockBackend::new();
        let ctx = backend.create_context("framing", &[]).await.unwrap();
        drop(ctx);
        assert_eq!(backend.contexts_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let backend = MockBackend::new().with_stateless_replies(vec![MockReply::delayed(
            Duration::from_secs(3),
            MockReply::text("late"),
        )]);
        let start = tokio::time::Instant::now();
        let reply = backend.send_once_stateless("framing", "hi").await.unwrap();
        assert_eq!(reply, "late");
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
