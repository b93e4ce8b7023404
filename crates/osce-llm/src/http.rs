//! Chat-completions backend over HTTP.
//!
//! Speaks the widely implemented `POST {base_url}/chat/completions` shape.
//! The protocol is stateless, so a context keeps its own turn history and
//! replays it with the framing prompt on every send.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use osce_core::errors::GatewayError;
use osce_core::generative::{ChatSession, ConversationContext, GenerativeBackend, Turn, TurnRole};

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Transport-level ceiling; the per-request budget lives in `LimitedBackend`.
    pub connect_timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }
}

struct HttpInner {
    client: reqwest::Client,
    config: HttpConfig,
    endpoint: String,
}

#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<HttpInner>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("http client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            inner: Arc::new(HttpInner { client, config, endpoint }),
        })
    }

    pub fn model(&self) -> &str {
        &self.inner.config.model
    }
}

impl HttpInner {
    #[instrument(skip_all, fields(model = %self.config.model, turns = history.len()))]
    async fn complete(&self, framing: &str, history: &[Turn], text: &str) -> Result<String, GatewayError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage { role: "system", content: framing });
        for turn in history {
            let role = match turn.role {
                TurnRole::Trainee => "user",
                TurnRole::Patient => "assistant",
            };
            messages.push(WireMessage { role, content: &turn.text });
        }
        messages.push(WireMessage { role: "user", content: text });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status.as_u16(), body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(map_transport_error)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_owned())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::InvalidRequest(format!("undecodable response: {err}"))
    } else {
        GatewayError::NetworkError(err.to_string())
    }
}

struct HttpChatSession {
    backend: Arc<HttpInner>,
    framing: String,
    turns: Vec<Turn>,
}

#[async_trait]
impl ChatSession for HttpChatSession {
    async fn send(&mut self, text: &str) -> Result<String, GatewayError> {
        let reply = self.backend.complete(&self.framing, &self.turns, text).await?;
        self.turns.push(Turn::trainee(text));
        self.turns.push(Turn::patient(reply.clone()));
        Ok(reply)
    }

    fn history(&self) -> &[Turn] {
        &self.turns
    }
}

#[async_trait]
impl GenerativeBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_context(
        &self,
        framing: &str,
        prior_turns: &[Turn],
    ) -> Result<ConversationContext, GatewayError> {
        let session = HttpChatSession {
            backend: self.inner.clone(),
            framing: framing.to_owned(),
            turns: prior_turns.to_vec(),
        };
        Ok(ConversationContext::new(framing, Box::new(session)))
    }

    async fn send_once_stateless(&self, framing: &str, text: &str) -> Result<String, GatewayError> {
        self.inner.complete(framing, &[], text).await
    }
}
