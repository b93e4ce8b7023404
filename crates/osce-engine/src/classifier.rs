use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use osce_core::generative::GenerativeBackend;
use osce_core::intent::{IntentCode, IntentResult};

use crate::rules;

const CLASSIFIER_FRAMING: &str =
    "You classify trainee questions in a medical OSCE station. Reply with exactly one label and nothing else.";

/// Maps free text onto an [`IntentCode`].
///
/// The primary path asks the generative backend for a label; any failure or
/// out-of-vocabulary answer drops to the deterministic rule cascade. A
/// classifier without a backend, or over an offline one, runs the cascade
/// only.
#[derive(Clone)]
pub struct IntentClassifier {
    backend: Option<Arc<dyn GenerativeBackend>>,
}

impl IntentClassifier {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        if backend.is_offline() {
            return Self::rules_only();
        }
        Self { backend: Some(backend) }
    }

    pub fn rules_only() -> Self {
        Self { backend: None }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Always returns a result from the closed vocabulary.
    pub async fn classify(&self, text: &str) -> IntentResult {
        let Some(backend) = &self.backend else {
            return rules::fallback_classify(text);
        };

        match backend.send_once_stateless(CLASSIFIER_FRAMING, &build_prompt(text)).await {
            Ok(raw) => match parse_label(&raw) {
                Some(intent) => {
                    debug!(intent = %intent, "primary classification");
                    return IntentResult::new(intent, 1.0, text);
                }
                None => {
                    warn!(
                        label = %raw.trim(),
                        degraded = "ClassificationDegraded",
                        "classifier returned an unknown label, using rule cascade"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    error_kind = e.error_kind(),
                    degraded = "ClassificationDegraded",
                    "classifier unavailable, using rule cascade"
                );
            }
        }

        rules::fallback_classify(text)
    }
}

/// Instruction prompt enumerating the whole vocabulary.
pub fn build_prompt(text: &str) -> String {
    let mut prompt = String::from(
        "Task: Classify the trainee's input into one OSCE intent.\nReturn ONLY the intent code.\n\nVALID INTENT CODES:\n",
    );
    for code in IntentCode::ALL {
        let _ = match hint(code) {
            Some(h) => writeln!(prompt, "- {} ({h})", code.as_str()),
            None => writeln!(prompt, "- {}", code.as_str()),
        };
    }
    let _ = write!(prompt, "\nINPUT: \"{}\"\nOUTPUT_LABEL:", text.replace('"', "'"));
    prompt
}

fn hint(code: IntentCode) -> Option<&'static str> {
    match code {
        IntentCode::Clinical => Some("medical, but none of the above fit"),
        IntentCode::Conversational => Some("small talk"),
        IntentCode::Unclear => Some("gibberish"),
        IntentCode::NurseCommand => Some("the trainee addresses the nurse"),
        IntentCode::Unknown => Some("do not use"),
        _ => None,
    }
}

/// Strip quoting and punctuation from a model reply and upper-case it.
pub fn clean_label(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| !matches!(c, '"' | '\'' | '`')).collect();
    stripped
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .trim_end_matches(['.', ',', ';', ':'])
        .to_uppercase()
}

/// Validate a model reply against the vocabulary. `UNKNOWN` is not a
/// legitimate classifier output, so it is rejected along with junk.
pub fn parse_label(raw: &str) -> Option<IntentCode> {
    IntentCode::from_label(&clean_label(raw)).filter(|code| *code != IntentCode::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osce_core::errors::GatewayError;
    use osce_llm::{MockBackend, MockReply};

    fn classifier(backend: MockBackend) -> IntentClassifier {
        IntentClassifier::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn valid_label_has_full_confidence() {
        let c = classifier(MockBackend::new().with_stateless_replies(vec![MockReply::text("ASK_ONSET")]));
        let r = c.classify("when did this begin").await;
        assert_eq!(r.intent, IntentCode::AskOnset);
        assert_eq!(r.confidence, 1.0);
    }

    #[tokio::test]
    async fn quoted_lowercase_label_is_cleaned() {
        let c = classifier(
            MockBackend::new().with_stateless_replies(vec![MockReply::text("  `\"request_ecg\"`\n")]),
        );
        assert_eq!(c.classify("ecg please").await.intent, IntentCode::RequestEcg);
    }

    #[tokio::test]
    async fn legacy_suffix_is_accepted() {
        let c = classifier(
            MockBackend::new().with_stateless_replies(vec![MockReply::text("CONVERSATIONAL_INTENT")]),
        );
        assert_eq!(c.classify("nice weather").await.intent, IntentCode::Conversational);
    }

    #[tokio::test]
    async fn outage_falls_back_to_rules() {
        let c = classifier(MockBackend::failing(GatewayError::Timeout(std::time::Duration::from_secs(20))));
        let r = c.classify("Hello there").await;
        assert_eq!(r.intent, IntentCode::Conversational);
        assert_eq!(r.confidence, 0.9);
    }

    #[tokio::test]
    async fn invalid_label_falls_back_to_rules() {
        let c = classifier(
            MockBackend::new().with_stateless_replies(vec![MockReply::text("ASK_SHOE_SIZE")]),
        );
        let r = c.classify("Do you have any allergies?").await;
        assert_eq!(r.intent, IntentCode::AskAllergies);
        assert_eq!(r.confidence, 0.8);
    }

    #[tokio::test]
    async fn unknown_label_is_not_accepted() {
        let c = classifier(MockBackend::new().with_stateless_replies(vec![MockReply::text("UNKNOWN")]));
        let r = c.classify("zzzz").await;
        assert_eq!(r.intent, IntentCode::Unclear);
        assert_eq!(r.confidence, 0.0);
    }

    #[tokio::test]
    async fn always_returns_vocabulary_member_under_outage() {
        let c = classifier(MockBackend::failing(GatewayError::NetworkError("down".into())));
        for text in ["", "?", "Hello", "Can I examine your tummy", "ñ∂ƒ", "When did it start"] {
            let r = c.classify(text).await;
            assert!(IntentCode::ALL.contains(&r.intent));
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }

    #[tokio::test]
    async fn rules_only_never_calls_out() {
        let c = IntentClassifier::rules_only();
        assert!(!c.has_backend());
        assert_eq!(c.classify("Any allergies?").await.intent, IntentCode::AskAllergies);
    }

    #[tokio::test]
    async fn offline_backend_means_rules_only() {
        let c = IntentClassifier::new(Arc::new(osce_llm::OfflineBackend));
        assert!(!c.has_backend());
        let r = c.classify("When did the pain start?").await;
        assert_eq!(r.intent, IntentCode::AskOnset);
        assert_eq!(r.confidence, 0.8);
    }

    #[test]
    fn prompt_lists_every_label() {
        let prompt = build_prompt("say \"hi\"");
        for code in IntentCode::ALL {
            assert!(prompt.contains(code.as_str()));
        }
        assert!(prompt.contains("INPUT: \"say 'hi'\""));
    }

    #[test]
    fn clean_label_takes_first_line() {
        assert_eq!(clean_label("\n ask_allergies.\nbecause..."), "ASK_ALLERGIES");
        assert_eq!(clean_label(""), "");
    }
}
