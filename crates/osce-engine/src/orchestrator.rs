//! Per-message pipeline.
//!
//! `handle` runs, in order: validate, load case and session (recreating a
//! missing session), coarse route, classify, gate, repeat check, resolve or
//! generate, style, then one `save` of the accumulated [`SessionPatch`].
//! Nothing is written before that final save, so a request dropped midway
//! leaves the session exactly as it was.
//!
//! Every step emits an event on the `audit` target carrying `session_id`,
//! `case_id` and `step`, which is enough to replay a grading decision.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use osce_core::case::CaseKnowledge;
use osce_core::generative::Turn;
use osce_core::ids::{CaseId, SessionId, UserId};
use osce_core::intent::IntentCode;
use osce_core::message::{InboundMessage, Reply};
use osce_core::session::{Session, SessionPatch};
use osce_core::stage::{StageName, StageTransition};
use osce_settings::{ClinicalMode, RouterKind};
use osce_store::{CaseStore, SessionStore};
use osce_telemetry::AUDIT_TARGET;

use crate::classifier::IntentClassifier;
use crate::config::EngineConfig;
use crate::disclosure::{self, ALREADY_MENTIONED};
use crate::error::EngineError;
use crate::fallback::{self, GenerationMode, GenerationOutcome, GenerationRequest};
use crate::framing::Persona;
use crate::gate;
use crate::mapper::{PassthroughMapper, StyleMapper};
use crate::resolver;
use crate::router::{ClinicalRouter, CoarseRouter, KeywordRouter, RouteCategory};
use crate::session_cache::GenerativeSessionCache;

pub const CLARIFY: &str =
    "I'm sorry, could you rephrase that? I want to make sure I understand what you're asking.";

/// Emit one audit event for `$msg`'s session.
macro_rules! audit {
    ($session:expr, $case:expr, $step:literal, $($rest:tt)+) => {
        tracing::info!(
            target: AUDIT_TARGET,
            session_id = %$session,
            case_id = %$case,
            step = $step,
            $($rest)+
        )
    };
}

/// Marks a session as having a request in flight. Released on drop, which
/// covers both completion and cancellation of the owning future.
struct BusyGuard {
    in_flight: Arc<DashMap<SessionId, Instant>>,
    session_id: SessionId,
}

impl BusyGuard {
    fn acquire(in_flight: &Arc<DashMap<SessionId, Instant>>, session_id: &SessionId) -> Result<Self, EngineError> {
        match in_flight.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::SessionBusy(session_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(Self {
                    in_flight: Arc::clone(in_flight),
                    session_id: session_id.clone(),
                })
            }
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.session_id);
    }
}

pub struct Orchestrator {
    sessions: Arc<dyn SessionStore>,
    cases: Arc<dyn CaseStore>,
    cache: Arc<GenerativeSessionCache>,
    /// Nurse contexts, keyed by the same session ids but never shared with
    /// the patient's.
    nurse_cache: Arc<GenerativeSessionCache>,
    classifier: IntentClassifier,
    router: Arc<dyn CoarseRouter>,
    mapper: Arc<dyn StyleMapper>,
    clinical_mode: ClinicalMode,
    in_flight: Arc<DashMap<SessionId, Instant>>,
}

impl Orchestrator {
    /// The classifier and the nurse pool share the cache's generative backend.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        cases: Arc<dyn CaseStore>,
        cache: Arc<GenerativeSessionCache>,
        config: &EngineConfig,
    ) -> Self {
        let router: Arc<dyn CoarseRouter> = match config.router {
            RouterKind::Clinical => Arc::new(ClinicalRouter),
            RouterKind::Keyword => Arc::new(KeywordRouter),
        };
        let nurse_cache = GenerativeSessionCache::new(Arc::clone(cache.backend()), config.nurse_cache.clone())
            .with_persona(Persona::Nurse);
        Self {
            sessions,
            cases,
            classifier: IntentClassifier::new(Arc::clone(cache.backend())),
            cache,
            nurse_cache: Arc::new(nurse_cache),
            router,
            mapper: Arc::new(PassthroughMapper),
            clinical_mode: config.clinical_mode,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn CoarseRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn StyleMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn cache(&self) -> &Arc<GenerativeSessionCache> {
        &self.cache
    }

    pub fn nurse_cache(&self) -> &Arc<GenerativeSessionCache> {
        &self.nurse_cache
    }

    /// Start the TTL sweepers of both context pools.
    pub fn spawn_sweepers(&self, cancel: CancellationToken) -> [JoinHandle<()>; 2] {
        [
            self.cache.spawn_sweeper(cancel.clone()),
            self.nurse_cache.spawn_sweeper(cancel),
        ]
    }

    pub fn session(&self, session_id: &SessionId) -> Result<Option<Session>, EngineError> {
        Ok(self.sessions.load(session_id)?)
    }

    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.in_flight.contains_key(session_id)
    }

    /// Answer one trainee message.
    #[instrument(skip_all, fields(session_id = %msg.session_id, case_id = %msg.case_id))]
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Reply, EngineError> {
        let text = msg.text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let _busy = BusyGuard::acquire(&self.in_flight, &msg.session_id)?;

        let case = self.load_case(&msg.case_id)?;
        let session = self.load_or_create(msg)?;
        let mut patch = SessionPatch::default();

        let route = self.router.route(text);
        audit!(
            session.id,
            session.case_id,
            "route",
            router = self.router.name(),
            category = route.category.as_str(),
            confidence = route.confidence as f64,
            "message routed"
        );

        let reply = match route.category {
            RouteCategory::Unclear => return Ok(Reply::unclear(CLARIFY)),
            RouteCategory::Nurse => self.nurse_reply(&session, &case, text).await,
            RouteCategory::Conversational => self.free_reply(&session, &case, text).await,
            RouteCategory::Clinical => match self.clinical_reply(&session, &case, text, &mut patch).await {
                Some(reply) => reply,
                None => return Ok(Reply::unclear(CLARIFY)),
            },
        };

        patch.append_turns = vec![Turn::trainee(text), Turn::patient(reply.text.clone())];
        patch.last_interaction_at = Some(Utc::now());
        self.sessions.save(&session.id, &patch)?;
        Ok(reply)
    }

    /// Classify and dispatch. `None` means the text was unclear and the turn
    /// should leave no trace.
    async fn clinical_reply(
        &self,
        session: &Session,
        case: &CaseKnowledge,
        text: &str,
        patch: &mut SessionPatch,
    ) -> Option<Reply> {
        let result = self.classifier.classify(text).await;
        let intent = result.intent;
        audit!(
            session.id,
            session.case_id,
            "classify",
            intent = intent.as_str(),
            confidence = result.confidence as f64,
            "intent classified"
        );

        match intent {
            IntentCode::Unclear => return None,
            IntentCode::Conversational => return Some(self.free_reply(session, case, text).await),
            IntentCode::NurseCommand => return Some(self.nurse_reply(session, case, text).await),
            _ => {}
        }

        let decision = gate::check(session.current_stage, intent);
        audit!(
            session.id,
            session.case_id,
            "gate",
            intent = intent.as_str(),
            stage = session.current_stage.as_str(),
            allowed = decision.allowed,
            reason = decision.reason.as_deref().unwrap_or(""),
            "stage policy checked"
        );
        if let Some(reason) = decision.reason {
            return Some(Reply::clinical(reason, intent).blocked());
        }

        if intent == IntentCode::Clinical {
            let fact = resolver::resolve(intent, case);
            let mode = GenerationMode::grounded(fact.text);
            let outcome = self.generate(session, case, text, &mode).await;
            return Some(Reply::clinical(outcome.text, intent));
        }

        if disclosure::has_revealed(session, intent) {
            audit!(
                session.id,
                session.case_id,
                "repeat",
                intent = intent.as_str(),
                "fact already disclosed"
            );
            return Some(Reply::clinical(ALREADY_MENTIONED, intent));
        }

        let fact = resolver::resolve(intent, case);
        audit!(
            session.id,
            session.case_id,
            "resolve",
            intent = intent.as_str(),
            source_path = fact.source_path.as_str(),
            found = fact.found,
            "fact resolved"
        );
        let answer = match self.clinical_mode {
            ClinicalMode::Deterministic => fact.text,
            ClinicalMode::Grounded => {
                let mode = GenerationMode::grounded(fact.text);
                self.generate(session, case, text, &mode).await.text
            }
        };

        let styled = self.mapper.map(&answer, intent, case).await;
        disclosure::mark_revealed(session, patch, intent);
        Some(Reply::clinical(styled.text, intent))
    }

    async fn free_reply(&self, session: &Session, case: &CaseKnowledge, text: &str) -> Reply {
        let outcome = self.generate(session, case, text, &GenerationMode::Free).await;
        Reply::conversational(outcome.text).with_intent(IntentCode::Conversational)
    }

    /// Orders go to the nurse persona. Nothing is marked revealed.
    async fn nurse_reply(&self, session: &Session, case: &CaseKnowledge, text: &str) -> Reply {
        let outcome = self.generate(session, case, text, &GenerationMode::Nurse).await;
        Reply::clinical(outcome.text, IntentCode::NurseCommand)
    }

    async fn generate(
        &self,
        session: &Session,
        case: &CaseKnowledge,
        text: &str,
        mode: &GenerationMode,
    ) -> GenerationOutcome {
        // The transcript holds the patient's side of the interview, so a
        // rebuilt nurse context starts empty.
        let (cache, prior_turns) = match mode {
            GenerationMode::Nurse => (&self.nurse_cache, &[][..]),
            _ => (&self.cache, session.transcript.as_slice()),
        };
        let outcome = fallback::generate(
            cache,
            GenerationRequest {
                session_id: &session.id,
                case,
                stage: session.current_stage,
                prior_turns,
                text,
                mode,
            },
        )
        .await;
        audit!(
            session.id,
            session.case_id,
            "generate",
            mode = mode.as_str(),
            tier = outcome.tier.as_str(),
            "response generated"
        );
        outcome
    }

    /// Move the session to `target`. Moving to the current or an earlier
    /// stage is a no-op; skipping a stage is rejected.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn advance_stage(&self, session_id: &SessionId, target: StageName) -> Result<Session, EngineError> {
        let _busy = BusyGuard::acquire(&self.in_flight, session_id)?;
        let mut session = self.load_active(session_id)?;
        let from = session.current_stage;

        match from.transition_to(target) {
            StageTransition::Unchanged => return Ok(session),
            StageTransition::Skip => {
                return Err(EngineError::InvalidStageTransition { from, to: target });
            }
            StageTransition::Advance => {}
        }

        let patch = SessionPatch {
            current_stage: Some(target),
            completed_stage: Some(from),
            last_interaction_at: Some(Utc::now()),
            ..Default::default()
        };
        self.sessions.save(session_id, &patch)?;
        patch.apply(&mut session);
        self.cache.invalidate(session_id);
        self.nurse_cache.invalidate(session_id);
        audit!(
            session.id,
            session.case_id,
            "stage",
            from = from.as_str(),
            to = target.as_str(),
            "stage advanced"
        );
        Ok(session)
    }

    /// Archive the session and release its generative contexts.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn end_session(&self, session_id: &SessionId) -> Result<(), EngineError> {
        let _busy = BusyGuard::acquire(&self.in_flight, session_id)?;
        let session = self
            .sessions
            .load(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        if session.is_active() {
            self.sessions.archive(session_id)?;
        }
        self.cache.invalidate(session_id);
        self.nurse_cache.invalidate(session_id);
        audit!(session.id, session.case_id, "end", "session archived");
        Ok(())
    }

    fn load_case(&self, case_id: &CaseId) -> Result<Arc<CaseKnowledge>, EngineError> {
        self.cases.load(case_id).map_err(|e| {
            if e.is_not_found() {
                EngineError::CaseNotFound(case_id.clone())
            } else {
                e.into()
            }
        })
    }

    fn load_active(&self, session_id: &SessionId) -> Result<Session, EngineError> {
        let session = self
            .sessions
            .load(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        if !session.is_active() {
            return Err(EngineError::SessionArchived(session_id.clone()));
        }
        Ok(session)
    }

    fn load_or_create(&self, msg: &InboundMessage) -> Result<Session, EngineError> {
        let session = match self.sessions.load(&msg.session_id)? {
            Some(session) => session,
            None => {
                let user = msg.user_id.clone().unwrap_or_else(UserId::anonymous);
                info!(session_id = %msg.session_id, "session not found, recreating");
                let session = self.sessions.create_with_id(&msg.session_id, &user, &msg.case_id)?;
                info!(session_id = %session.id, user_id = %session.user_id, "session created");
                session
            }
        };
        if session.case_id != msg.case_id {
            return Err(EngineError::CaseMismatch {
                session_id: session.id,
                expected: session.case_id,
                requested: msg.case_id.clone(),
            });
        }
        if !session.is_active() {
            return Err(EngineError::SessionArchived(session.id));
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use osce_core::errors::GatewayError;
    use osce_llm::{MockBackend, MockReply, OfflineBackend};
    use osce_store::{InMemoryCaseStore, InMemorySessionStore};
    use osce_telemetry::{AuditLayer, AuditQuery, AuditSink};
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    use crate::fallback::NURSE_ACK;
    use crate::session_cache::CacheConfig;

    struct Harness {
        orchestrator: Orchestrator,
        sessions: Arc<InMemorySessionStore>,
        cases: Arc<InMemoryCaseStore>,
        backend: Arc<MockBackend>,
        case_id: CaseId,
    }

    fn chest_pain_case() -> CaseKnowledge {
        serde_json::from_value(json!({
            "case_metadata": { "case_id": "cp-01", "title": "Chest pain" },
            "truth": {
                "demographics": { "age": 58, "sex": "male" },
                "history": { "onset": "About two hours ago, while gardening." },
                "allergies": "",
                "physical_exam": { "cardiovascular": "Tachycardic, no murmurs." },
                "investigations": { "bedside": { "ECG": "ST elevation in II, III and aVF." } }
            }
        }))
        .unwrap()
    }

    fn harness_with(backend: MockBackend, config: EngineConfig, rules_only: bool) -> Harness {
        let backend = Arc::new(backend);
        let sessions = Arc::new(InMemorySessionStore::new());
        let cases = Arc::new(InMemoryCaseStore::new());
        let case_id = cases.insert(chest_pain_case());
        let cache = Arc::new(GenerativeSessionCache::new(backend.clone(), config.cache.clone()));
        let mut orchestrator = Orchestrator::new(sessions.clone(), cases.clone(), cache, &config);
        if rules_only {
            orchestrator = orchestrator.with_classifier(IntentClassifier::rules_only());
        }
        Harness {
            orchestrator,
            sessions,
            cases,
            backend,
            case_id,
        }
    }

    fn harness(backend: MockBackend) -> Harness {
        harness_with(backend, EngineConfig::default(), true)
    }

    impl Harness {
        fn msg(&self, session: &SessionId, text: &str) -> InboundMessage {
            InboundMessage::new(text, session.clone(), self.case_id.clone())
        }

        async fn ask(&self, session: &SessionId, text: &str) -> Reply {
            self.orchestrator.handle(&self.msg(session, text)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn first_message_creates_session() {
        let h = harness(MockBackend::new());
        let id = SessionId::from_raw("sess_new");
        let reply = h.ask(&id, "When did the pain start?").await;
        assert_eq!(reply, Reply::clinical("About two hours ago, while gardening.", IntentCode::AskOnset));

        let session = h.sessions.load(&id).unwrap().unwrap();
        assert_eq!(session.user_id, UserId::anonymous());
        assert!(session.revealed_intents.contains(&IntentCode::AskOnset));
        assert_eq!(session.transcript.len(), 2);
    }

    #[tokio::test]
    async fn repeat_question_gets_already_mentioned() {
        let h = harness(MockBackend::new());
        let id = SessionId::new();
        let first = h.ask(&id, "When did the pain start?").await;
        assert_eq!(first.text, "About two hours ago, while gardening.");

        let second = h.ask(&id, "When did it begin?").await;
        assert_eq!(second.text, ALREADY_MENTIONED);
        assert_eq!(second.intent, Some(IntentCode::AskOnset));

        let session = h.sessions.load(&id).unwrap().unwrap();
        assert_eq!(session.revealed_intents.len(), 1);
    }

    #[tokio::test]
    async fn exam_denied_during_history() {
        let h = harness(MockBackend::new());
        let id = SessionId::new();
        let reply = h.ask(&id, "Can I listen to your heart?").await;
        assert!(reply.is_blocked());
        assert!(reply.text.contains("physical exam"));
        let session = h.sessions.load(&id).unwrap().unwrap();
        assert!(session.revealed_intents.is_empty());
    }

    #[tokio::test]
    async fn stage_advance_unlocks_exam_and_is_monotonic() {
        let h = harness(MockBackend::new());
        let id = SessionId::new();
        h.ask(&id, "Do you have any allergies?").await;

        let s = h.orchestrator.advance_stage(&id, StageName::Examination).await.unwrap();
        assert_eq!(s.current_stage, StageName::Examination);
        assert_eq!(s.completed_stages, vec![StageName::History]);

        let reply = h.ask(&id, "Can I listen to your heart?").await;
        assert_eq!(reply.text, "Tachycardic, no murmurs.");

        let back = h.orchestrator.advance_stage(&id, StageName::History).await.unwrap();
        assert_eq!(back.current_stage, StageName::Examination);

        let err = h.orchestrator.advance_stage(&id, StageName::Management).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStageTransition { .. }));
    }

    #[tokio::test]
    async fn blank_allergies_answer_default() {
        let h = harness(MockBackend::new());
        let reply = h.ask(&SessionId::new(), "Do you have any allergies?").await;
        assert_eq!(reply.text, "No allergies.");
    }

    #[tokio::test]
    async fn greeting_goes_to_free_mode() {
        let h = harness(MockBackend::new().with_context_replies(vec![MockReply::text("Hello, doctor.")]));
        let reply = h.ask(&SessionId::new(), "Hello there").await;
        assert_eq!(reply, Reply::conversational("Hello, doctor.").with_intent(IntentCode::Conversational));
        assert_eq!(h.backend.contexts_created(), 1);
    }

    #[tokio::test]
    async fn outage_still_answers() {
        let h = harness(MockBackend::failing(GatewayError::NetworkError("down".into())));
        let id = SessionId::new();
        let reply = h.ask(&id, "Hello there").await;
        assert_eq!(reply.text, fallback::FREE_APOLOGY);
        let reply = h.ask(&id, "When did the pain start?").await;
        assert_eq!(reply.text, "About two hours ago, while gardening.");
    }

    #[tokio::test]
    async fn unclear_leaves_no_trace() {
        let h = harness(MockBackend::new());
        let id = SessionId::new();
        let reply = h.ask(&id, "qwxz").await;
        assert_eq!(reply, Reply::unclear(CLARIFY));
        let session = h.sessions.load(&id).unwrap().unwrap();
        assert!(session.transcript.is_empty());
    }

    #[tokio::test]
    async fn nurse_answers_from_her_own_context() {
        let backend = MockBackend::new().with_context_replies(vec![
            MockReply::text("Hello, doctor."),
            MockReply::text("Of course, doctor. Running the ECG now."),
        ]);
        let h = harness(backend);
        let id = SessionId::new();
        h.ask(&id, "Hello there").await;

        let reply = h.ask(&id, "Nurse, can you get an ECG?").await;
        assert_eq!(
            reply,
            Reply::clinical("Of course, doctor. Running the ECG now.", IntentCode::NurseCommand)
        );
        assert_eq!(h.backend.contexts_created(), 2);
        let nurse_framing = &h.backend.framings()[1];
        assert!(nurse_framing.contains("Nurse Sarah"));
        assert!(!nurse_framing.contains("gardening"));
        assert!(h.backend.prior_turns()[1].is_empty());
        assert!(h.orchestrator.cache().contains(&id));
        assert!(h.orchestrator.nurse_cache().contains(&id));
        assert!(h.sessions.load(&id).unwrap().unwrap().revealed_intents.is_empty());

        h.orchestrator.end_session(&id).await.unwrap();
        assert!(!h.orchestrator.nurse_cache().contains(&id));
        assert_eq!(h.backend.contexts_closed(), 2);
    }

    #[tokio::test]
    async fn nurse_outage_falls_back_to_acknowledgement() {
        let h = harness(MockBackend::failing(GatewayError::NetworkError("down".into())));
        let id = SessionId::new();
        let reply = h.ask(&id, "Nurse, can you get an ECG?").await;
        assert_eq!(reply, Reply::clinical(NURSE_ACK, IntentCode::NurseCommand));
        assert!(h.sessions.load(&id).unwrap().unwrap().revealed_intents.is_empty());
    }

    #[tokio::test]
    async fn stage_advance_drops_nurse_context() {
        let backend = MockBackend::new().with_context_replies(vec![MockReply::text("Right away, doctor.")]);
        let h = harness(backend);
        let id = SessionId::new();
        h.ask(&id, "Nurse, please check her blood pressure").await;
        assert!(h.orchestrator.nurse_cache().contains(&id));

        h.orchestrator.advance_stage(&id, StageName::Examination).await.unwrap();
        assert!(!h.orchestrator.nurse_cache().contains(&id));
    }

    #[tokio::test]
    async fn offline_turns_log_no_warnings() {
        let sink = Arc::new(AuditSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(AuditLayer::new(sink.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let cases = Arc::new(InMemoryCaseStore::new());
        let case_id = cases.insert(chest_pain_case());
        let cache = Arc::new(GenerativeSessionCache::new(Arc::new(OfflineBackend), CacheConfig::default()));
        let config = EngineConfig::default();
        let orchestrator = Orchestrator::new(Arc::new(InMemorySessionStore::new()), cases, cache, &config);
        let id = SessionId::new();
        let ask = |text: &str| InboundMessage::new(text, id.clone(), case_id.clone());

        let reply = orchestrator.handle(&ask("When did the pain start?")).await.unwrap();
        assert_eq!(reply.text, "About two hours ago, while gardening.");
        let reply = orchestrator.handle(&ask("Hello there")).await.unwrap();
        assert_eq!(reply.text, fallback::FREE_APOLOGY);
        let reply = orchestrator.handle(&ask("Nurse, can you get an ECG?")).await.unwrap();
        assert_eq!(reply.text, NURSE_ACK);

        let warnings = sink
            .query(&AuditQuery {
                level: Some("WARN".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert!(orchestrator.cache().is_empty());
        assert!(orchestrator.nurse_cache().is_empty());
    }

    #[tokio::test]
    async fn primary_classifier_label_drives_dispatch() {
        let backend = MockBackend::new().with_stateless_replies(vec![MockReply::text("REQUEST_ECG")]);
        let h = harness_with(backend, EngineConfig::default(), false);
        let reply = h.ask(&SessionId::new(), "Could we get a tracing of the heart?").await;
        assert!(reply.is_blocked());
        assert_eq!(reply.text, gate::TESTS_BEFORE_HISTORY);
    }

    #[tokio::test]
    async fn grounded_mode_phrases_fact_through_context() {
        let backend = MockBackend::new().with_context_replies(vec![MockReply::text("Couple of hours, in the garden.")]);
        let config = EngineConfig {
            clinical_mode: ClinicalMode::Grounded,
            ..EngineConfig::default()
        };
        let h = harness_with(backend, config, true);
        let id = SessionId::new();
        let reply = h.ask(&id, "When did the pain start?").await;
        assert_eq!(reply.text, "Couple of hours, in the garden.");
        assert!(h.sessions.load(&id).unwrap().unwrap().revealed_intents.contains(&IntentCode::AskOnset));
    }

    #[tokio::test]
    async fn request_errors() {
        let h = harness(MockBackend::new());
        let id = SessionId::new();
        let err = h.orchestrator.handle(&h.msg(&id, "   ")).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyMessage));

        let missing = InboundMessage::new("hi", SessionId::new(), CaseId::from_raw("nope"));
        let err = h.orchestrator.handle(&missing).await.unwrap_err();
        assert!(matches!(err, EngineError::CaseNotFound(_)));

        h.ask(&id, "When did the pain start?").await;
        let other = h.cases.insert(
            serde_json::from_value(json!({ "case_metadata": { "case_id": "sob-02" } })).unwrap(),
        );
        let wrong_case = InboundMessage::new("hi", id.clone(), other);
        let err = h.orchestrator.handle(&wrong_case).await.unwrap_err();
        assert!(matches!(err, EngineError::CaseMismatch { .. }));
    }

    #[tokio::test]
    async fn ended_session_rejects_messages_and_drops_context() {
        let h = harness(MockBackend::new().with_context_replies(vec![MockReply::text("Hi.")]));
        let id = SessionId::new();
        h.ask(&id, "Hello there").await;
        assert!(h.orchestrator.cache().contains(&id));

        h.orchestrator.end_session(&id).await.unwrap();
        assert!(!h.orchestrator.cache().contains(&id));
        assert_eq!(h.backend.contexts_closed(), 1);

        let err = h.orchestrator.handle(&h.msg(&id, "Hello again")).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionArchived(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_message_on_same_session_is_rejected() {
        let backend = MockBackend::new()
            .with_context_replies(vec![MockReply::delayed(Duration::from_secs(5), MockReply::text("Hmm."))]);
        let h = Arc::new(harness(backend));
        let id = SessionId::new();

        let slow = {
            let h = Arc::clone(&h);
            let id = id.clone();
            tokio::spawn(async move { h.orchestrator.handle(&h.msg(&id, "Hello there")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(h.orchestrator.is_busy(&id));

        let err = h.orchestrator.handle(&h.msg(&id, "When did the pain start?")).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionBusy(_)));

        slow.await.unwrap().unwrap();
        assert!(!h.orchestrator.is_busy(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_request_leaves_session_untouched() {
        let backend = MockBackend::new()
            .with_context_replies(vec![MockReply::delayed(Duration::from_secs(60), MockReply::text("late"))]);
        let config = EngineConfig {
            clinical_mode: ClinicalMode::Grounded,
            ..EngineConfig::default()
        };
        let h = harness_with(backend, config, true);
        let id = SessionId::new();
        let msg = h.msg(&id, "When did the pain start?");

        let result = tokio::time::timeout(Duration::from_secs(1), h.orchestrator.handle(&msg)).await;
        assert!(result.is_err());
        assert!(!h.orchestrator.is_busy(&id));

        let session = h.sessions.load(&id).unwrap().unwrap();
        assert!(session.revealed_intents.is_empty());
        assert!(session.transcript.is_empty());
    }

    #[tokio::test]
    async fn decisions_are_audited() {
        let sink = Arc::new(AuditSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(AuditLayer::new(sink.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let h = harness(MockBackend::new());
        let id = SessionId::from_raw("sess_audit");
        h.ask(&id, "Can I listen to your heart?").await;
        h.ask(&id, "When did the pain start?").await;

        let steps: Vec<String> = sink
            .recent_for_session("sess_audit", 50)
            .unwrap()
            .into_iter()
            .filter(|r| r.target == AUDIT_TARGET)
            .filter_map(|r| r.step)
            .collect();
        assert_eq!(
            steps,
            vec!["route", "classify", "gate", "route", "classify", "gate", "resolve"]
        );
    }

    #[tokio::test]
    async fn evicted_context_is_rebuilt_from_transcript() {
        let backend = MockBackend::new().with_context_replies(vec![
            MockReply::text("Hello."),
            MockReply::text("Hi again."),
        ]);
        let config = EngineConfig {
            cache: CacheConfig {
                max_sessions: 1,
                ..CacheConfig::default()
            },
            ..EngineConfig::default()
        };
        let h = harness_with(backend, config, true);
        let (a, b) = (SessionId::from_raw("sess_a"), SessionId::from_raw("sess_b"));
        h.ask(&a, "Hello there").await;
        h.ask(&b, "Hello there").await;
        assert!(!h.orchestrator.cache().contains(&a));

        h.ask(&a, "Hello again").await;
        let priors = h.backend.prior_turns();
        assert_eq!(priors.len(), 3);
        assert_eq!(priors[2], vec![Turn::trainee("Hello there"), Turn::patient("Hello.")]);
    }
}
