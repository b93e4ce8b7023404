//! Once-only disclosure of case facts.
//!
//! Works on the session record directly. The orchestrator checks
//! [`has_revealed`] before resolving a fact and records the reveal in the
//! same patch that persists the turn, so a cancelled request never marks a
//! fact it did not deliver.

use osce_core::intent::IntentCode;
use osce_core::session::{Session, SessionPatch};

pub const ALREADY_MENTIONED: &str = "I believe I already mentioned that.";

/// Greeting and unknown may be repeated freely.
pub fn is_exempt(intent: IntentCode) -> bool {
    intent.is_universal()
}

/// Whether the once-only rule applies to `intent` at all.
pub fn is_tracked(intent: IntentCode) -> bool {
    intent.is_fact() && !is_exempt(intent)
}

pub fn has_revealed(session: &Session, intent: IntentCode) -> bool {
    is_tracked(intent) && session.revealed_intents.contains(&intent)
}

/// Record the reveal on the pending patch. Exempt and already revealed
/// intents are a no-op.
pub fn mark_revealed(session: &Session, patch: &mut SessionPatch, intent: IntentCode) {
    if is_tracked(intent) && !session.revealed_intents.contains(&intent) {
        patch.reveal.insert(intent);
    }
}
