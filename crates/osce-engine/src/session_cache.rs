//! Bounded pool of live conversation contexts, one per session.
//!
//! Entries are evicted three ways: least-recently-used when a miss finds the
//! pool full, by the periodic TTL sweep, and explicitly when a session ends
//! or changes stage. All three, and every lookup, go through one mutex.
//! Removing an entry drops the cache's handle; the context closes itself once
//! the last in-flight request holding it finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use osce_core::case::CaseKnowledge;
use osce_core::errors::GatewayError;
use osce_core::generative::{ConversationContext, GenerativeBackend, Turn};
use osce_core::ids::SessionId;
use osce_core::stage::StageName;

use crate::framing::Persona;

/// A context shared between the cache and the request currently using it.
pub type SharedContext = Arc<tokio::sync::Mutex<ConversationContext>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_sessions: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct CacheEntry {
    context: SharedContext,
    last_used: Instant,
    /// Monotonic use counter; the smallest value is the LRU entry. Ties on
    /// `last_used` are common under a coarse or paused clock.
    use_seq: u64,
}

#[derive(Default)]
struct Pool {
    entries: HashMap<SessionId, CacheEntry>,
    next_seq: u64,
}

impl Pool {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict_lru(&mut self) -> Option<SessionId> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.use_seq)
            .map(|(id, _)| id.clone())?;
        self.entries.remove(&victim);
        Some(victim)
    }
}

pub struct GenerativeSessionCache {
    backend: Arc<dyn GenerativeBackend>,
    config: CacheConfig,
    persona: Persona,
    pool: parking_lot::Mutex<Pool>,
}

impl GenerativeSessionCache {
    pub fn new(backend: Arc<dyn GenerativeBackend>, config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_sessions: config.max_sessions.max(1),
            ..config
        };
        Self {
            backend,
            config,
            persona: Persona::Patient,
            pool: parking_lot::Mutex::new(Pool::default()),
        }
    }

    /// Frame new contexts as `persona` instead of the patient.
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the session's context, creating it on a miss.
    ///
    /// A miss builds the persona's framing for `stage`, seeds the context with
    /// `prior_turns`, and evicts the LRU entry first if the pool is full.
    /// The pool lock is not held while the backend creates the context; if a
    /// concurrent miss for the same session wins the race, its context is
    /// kept and ours is dropped.
    pub async fn get_or_create(
        &self,
        session_id: &SessionId,
        case: &CaseKnowledge,
        stage: StageName,
        prior_turns: &[Turn],
    ) -> Result<SharedContext, GatewayError> {
        if let Some(hit) = self.touch(session_id) {
            debug!(session_id = %session_id, "generative context hit");
            return Ok(hit);
        }

        let framing = self.persona.framing(case, stage);
        let context = self.backend.create_context(&framing, prior_turns).await?;
        let context = Arc::new(tokio::sync::Mutex::new(context));

        let mut pool = self.pool.lock();
        let seq = pool.bump();
        let now = Instant::now();
        if let Some(existing) = pool.entries.get_mut(session_id) {
            existing.last_used = now;
            existing.use_seq = seq;
            return Ok(existing.context.clone());
        }
        while pool.entries.len() >= self.config.max_sessions {
            match pool.evict_lru() {
                Some(victim) => debug!(session_id = %victim, "evicted LRU generative context"),
                None => break,
            }
        }
        pool.entries.insert(
            session_id.clone(),
            CacheEntry {
                context: context.clone(),
                last_used: now,
                use_seq: seq,
            },
        );
        debug!(session_id = %session_id, size = pool.entries.len(), "generative context created");
        Ok(context)
    }

    /// Refresh and return an existing entry.
    fn touch(&self, session_id: &SessionId) -> Option<SharedContext> {
        let mut pool = self.pool.lock();
        let seq = pool.bump();
        let entry = pool.entries.get_mut(session_id)?;
        entry.last_used = Instant::now();
        entry.use_seq = seq;
        Some(entry.context.clone())
    }

    pub fn invalidate(&self, session_id: &SessionId) -> bool {
        let removed = self.pool.lock().entries.remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "generative context invalidated");
        }
        removed
    }

    /// Drop every entry idle for longer than the TTL. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut pool = self.pool.lock();
        let before = pool.entries.len();
        pool.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_used) <= ttl);
        before - pool.entries.len()
    }

    pub fn len(&self) -> usize {
        self.pool.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.pool.lock().entries.contains_key(session_id)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval`
    /// until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("generative context sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.sweep_expired();
                        if evicted > 0 {
                            info!(
                                evicted,
                                remaining = cache.len(),
                                persona = cache.persona.as_str(),
                                "expired generative contexts swept"
                            );
                        }
                    }
                }
            }
        })
    }
}
