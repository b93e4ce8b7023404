use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use osce_core::errors::GatewayError;
use osce_core::generative::{ChatSession, ConversationContext, GenerativeBackend, Turn};

use crate::limiter::RateLimiter;

/// Wraps a backend with the shared [`RateLimiter`] and a per-request timeout.
///
/// Every upstream call, stateless or through a context this backend created,
/// takes a limiter permit first. The timeout covers the call itself, not the
/// time spent queued. Nothing is retried here.
pub struct LimitedBackend<B: GenerativeBackend> {
    inner: B,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl<B: GenerativeBackend> LimitedBackend<B> {
    pub fn new(inner: B, limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        Self { inner, limiter, timeout }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

async fn guarded<T>(
    limiter: &RateLimiter,
    timeout: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    let _permit = limiter.acquire().await?;
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "generative call timed out");
            Err(GatewayError::Timeout(timeout))
        }
    }
}

struct LimitedSession {
    inner: ConversationContext,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

#[async_trait]
impl ChatSession for LimitedSession {
    async fn send(&mut self, text: &str) -> Result<String, GatewayError> {
        guarded(&self.limiter, self.timeout, self.inner.send(text)).await
    }

    fn history(&self) -> &[Turn] {
        self.inner.history()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[async_trait]
impl<B: GenerativeBackend> GenerativeBackend for LimitedBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_offline(&self) -> bool {
        self.inner.is_offline()
    }

    async fn create_context(
        &self,
        framing: &str,
        prior_turns: &[Turn],
    ) -> Result<ConversationContext, GatewayError> {
        // Opening a context is local bookkeeping for most backends, so it is
        // bounded by the timeout but does not spend quota.
        let inner = tokio::time::timeout(self.timeout, self.inner.create_context(framing, prior_turns))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))??;
        let session = LimitedSession {
            inner,
            limiter: self.limiter.clone(),
            timeout: self.timeout,
        };
        Ok(ConversationContext::new(framing, Box::new(session)))
    }

    async fn send_once_stateless(&self, framing: &str, text: &str) -> Result<String, GatewayError> {
        guarded(&self.limiter, self.timeout, self.inner.send_once_stateless(framing, text)).await
    }
}
