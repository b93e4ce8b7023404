//! Response generation with a fixed three-tier fallback.
//!
//! | Tier        | Attempt                                                    |
//! |-------------|------------------------------------------------------------|
//! | `stateful`  | send through the session's cached context                  |
//! | `stateless` | one-shot call with freshly built framing and no history    |
//! | `offline`   | canonical fact text, a fixed apology or the nurse's ack    |
//!
//! Each tier runs at most once per request and the first success wins.
//! Failures are logged and never retried. Over an offline backend the remote
//! tiers are skipped outright.

use serde::Serialize;
use tracing::{debug, warn};

use osce_core::case::CaseKnowledge;
use osce_core::errors::GatewayError;
use osce_core::generative::Turn;
use osce_core::ids::SessionId;
use osce_core::stage::StageName;

use crate::session_cache::GenerativeSessionCache;

pub const FREE_APOLOGY: &str = "Sorry, doctor, I didn't quite catch that. Could you say it again?";
pub const NURSE_ACK: &str = "Yes, doctor. I'll take care of that right away.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationMode {
    /// In character and limited to the stage's facts. `offline` is the
    /// canonical text used when the service is unreachable.
    Grounded { offline: String },
    /// Small talk.
    Free,
    /// The nurse answering an order. Must run against the nurse cache.
    Nurse,
}

impl GenerationMode {
    pub fn grounded(offline: impl Into<String>) -> Self {
        Self::Grounded { offline: offline.into() }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grounded { .. } => "grounded",
            Self::Free => "free",
            Self::Nurse => "nurse",
        }
    }

    pub fn offline_text(&self) -> &str {
        match self {
            Self::Grounded { offline } => offline,
            Self::Free => FREE_APOLOGY,
            Self::Nurse => NURSE_ACK,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Stateful,
    Stateless,
    Offline,
}

impl Tier {
    pub const ORDER: [Tier; 3] = [Tier::Stateful, Tier::Stateless, Tier::Offline];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stateful => "stateful",
            Self::Stateless => "stateless",
            Self::Offline => "offline",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub text: String,
    pub tier: Tier,
}

/// Everything one generation needs.
#[derive(Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub session_id: &'a SessionId,
    pub case: &'a CaseKnowledge,
    pub stage: StageName,
    /// Seeds a context rebuilt after eviction.
    pub prior_turns: &'a [Turn],
    pub text: &'a str,
    pub mode: &'a GenerationMode,
}

pub async fn generate(cache: &GenerativeSessionCache, req: GenerationRequest<'_>) -> GenerationOutcome {
    if cache.backend().is_offline() {
        debug!(mode = req.mode.as_str(), "backend offline, answering from offline tier");
        return GenerationOutcome {
            text: req.mode.offline_text().to_owned(),
            tier: Tier::Offline,
        };
    }

    for tier in Tier::ORDER {
        match attempt(cache, &req, tier).await {
            Ok(text) => {
                debug!(tier = tier.as_str(), mode = req.mode.as_str(), "generation succeeded");
                return GenerationOutcome { text, tier };
            }
            Err(e) => {
                warn!(
                    session_id = %req.session_id,
                    persona = cache.persona().as_str(),
                    tier = tier.as_str(),
                    mode = req.mode.as_str(),
                    error = %e,
                    error_kind = e.error_kind(),
                    "generation tier failed"
                );
            }
        }
    }
    GenerationOutcome {
        text: req.mode.offline_text().to_owned(),
        tier: Tier::Offline,
    }
}

async fn attempt(
    cache: &GenerativeSessionCache,
    req: &GenerationRequest<'_>,
    tier: Tier,
) -> Result<String, GatewayError> {
    match tier {
        Tier::Stateful => {
            let context = cache
                .get_or_create(req.session_id, req.case, req.stage, req.prior_turns)
                .await?;
            let mut context = context.lock().await;
            let reply = context.send(req.text).await;
            if matches!(reply, Err(GatewayError::ContextClosed)) {
                drop(context);
                cache.invalidate(req.session_id);
            }
            non_empty(reply?)
        }
        Tier::Stateless => {
            let framing = cache.persona().framing(req.case, req.stage);
            let reply = cache.backend().send_once_stateless(&framing, req.text).await?;
            non_empty(reply)
        }
        Tier::Offline => Ok(req.mode.offline_text().to_owned()),
    }
}

fn non_empty(reply: String) -> Result<String, GatewayError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        Err(GatewayError::EmptyResponse)
    } else {
        Ok(trimmed.to_owned())
    }
}
