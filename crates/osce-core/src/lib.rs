//! Shared vocabulary for the patient-interview engine: identifiers, the intent
//! enumeration, exam stages, case knowledge, session state and the generative
//! backend seam.

pub mod case;
pub mod errors;
pub mod generative;
pub mod ids;
pub mod intent;
pub mod message;
pub mod session;
pub mod stage;

pub use errors::GatewayError;
pub use generative::{ChatSession, ConversationContext, GenerativeBackend, Turn, TurnRole};
pub use ids::{CaseId, SessionId, UserId};
pub use intent::{IntentCode, IntentGroup, IntentResult};
pub use message::{Category, InboundMessage, Reply};
pub use session::{Session, SessionPatch, SessionStatus};
pub use stage::StageName;
