//! Dialogue orchestration for the simulated patient interview.
//!
//! Each inbound message flows through [`Orchestrator::handle`]: coarse
//! routing, intent classification, the stage policy gate, the disclosure
//! check, fact resolution, and finally one persisted session patch. Calls to
//! the generative service go through the [`GenerativeSessionCache`] and its
//! fallback tiers so that upstream trouble never surfaces as an error.

pub mod classifier;
pub mod config;
pub mod disclosure;
pub mod error;
pub mod fallback;
pub mod framing;
pub mod gate;
pub mod mapper;
pub mod orchestrator;
pub mod resolver;
pub mod router;
pub mod rules;
pub mod session_cache;

pub use classifier::IntentClassifier;
pub use config::EngineConfig;
pub use error::EngineError;
pub use fallback::{GenerationMode, GenerationOutcome, Tier};
pub use gate::GateDecision;
pub use mapper::{PassthroughMapper, StyleMapper, StyledText};
pub use orchestrator::Orchestrator;
pub use resolver::{resolve, FactResult};
pub use router::{ClinicalRouter, CoarseRouter, KeywordRouter, Route, RouteCategory};
pub use session_cache::{CacheConfig, GenerativeSessionCache};
