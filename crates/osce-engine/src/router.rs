//! Coarse routing ahead of intent classification.
//!
//! [`ClinicalRouter`] sends everything to the classifier, which makes the
//! classifier the real dispatcher. [`KeywordRouter`] splits off obvious small
//! talk and gibberish first and is selected with `engine.router = "keyword"`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCategory {
    Clinical,
    Conversational,
    Unclear,
    Nurse,
}

impl RouteCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clinical => "clinical",
            Self::Conversational => "conversational",
            Self::Unclear => "unclear",
            Self::Nurse => "nurse",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Route {
    pub category: RouteCategory,
    pub confidence: f32,
}

impl Route {
    fn new(category: RouteCategory, confidence: f32) -> Self {
        Self { category, confidence }
    }
}

pub trait CoarseRouter: Send + Sync {
    fn name(&self) -> &'static str;
    fn route(&self, text: &str) -> Route;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClinicalRouter;

impl CoarseRouter for ClinicalRouter {
    fn name(&self) -> &'static str {
        "clinical"
    }

    fn route(&self, _text: &str) -> Route {
        Route::new(RouteCategory::Clinical, 1.0)
    }
}

const MEDICAL_KEYWORDS: &[&str] = &[
    "pain", "hurt", "ache", "symptom", "feel", "feeling", "history", "past", "medical", "family",
    "social", "smoke", "drink", "alcohol", "drug", "medication", "start", "started", "begin",
    "began", "onset", "happen", "occurred", "long", "duration", "time", "how long", "when", "exam",
    "examine", "look", "listen", "check", "measure", "breathing", "breath", "chest", "heart",
    "abdomen", "stomach", "old", "age", "live", "work", "occupation", "problem", "matter", "brings",
    "wrong", "issue", "reason", "here", "today", "bring", "why", "married", "partner", "husband",
    "wife", "kids", "children", "hobby", "hobbies", "fun",
];

const CONVERSATIONAL_KEYWORDS: &[&str] = &[
    "hello", "hi", "hey", "good morning", "good afternoon", "good evening", "thank you", "thanks",
    "bye", "goodbye", "see you", "sorry", "excuse me", "pardon", "name", "who", "your name",
    "my name is", "how are you", "how do you do", "nice to meet", "what is your name",
    "who are you", "introduce", "talk", "chat",
];

struct KeywordPatterns {
    command: Regex,
    nurse: Regex,
    question: Regex,
    greeting: Regex,
    farewell: Regex,
}

static PATTERNS: LazyLock<Option<KeywordPatterns>> = LazyLock::new(|| {
    Some(KeywordPatterns {
        command: Regex::new(r"\b(stop|pause|help)\b").ok()?,
        nurse: Regex::new(r"\b(nurse|sister|medical assistant)\b").ok()?,
        question: Regex::new(r"\b(what|when|where|why|how|can|could|would|do|does|is|are)\b").ok()?,
        greeting: Regex::new(r"^(hi|hello|hey|good morning|good afternoon|good evening)\b").ok()?,
        farewell: Regex::new(r"(bye|goodbye|see you|take care)$").ok()?,
    })
});

/// Keyword scoring router.
///
/// Commands (stop, pause, help) are conversational and addressing the nurse
/// is its own category. Otherwise the clinical and conversational scores
/// are compared; long messages with no clear winner count as clinical and
/// short ones as unclear.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordRouter;

impl KeywordRouter {
    fn clinical_score(patterns: &KeywordPatterns, text: &str) -> f32 {
        let matches = MEDICAL_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        let base = (matches as f32 * 0.15).min(0.8);
        let boost = if patterns.question.is_match(text) { 0.2 } else { 0.0 };
        (base + boost).min(1.0)
    }

    fn conversational_score(patterns: &KeywordPatterns, text: &str) -> f32 {
        let trimmed = text.trim();
        if patterns.greeting.is_match(trimmed) || patterns.farewell.is_match(trimmed) {
            return 1.0;
        }
        let chatty = CONVERSATIONAL_KEYWORDS.iter().any(|k| text.contains(*k));
        let medical = MEDICAL_KEYWORDS.iter().any(|k| text.contains(*k));
        if chatty && !medical {
            0.8
        } else {
            0.2
        }
    }
}

impl CoarseRouter for KeywordRouter {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn route(&self, text: &str) -> Route {
        let Some(patterns) = PATTERNS.as_ref() else {
            return Route::new(RouteCategory::Clinical, 0.5);
        };
        let t = text.to_lowercase();
        if t.trim().is_empty() {
            return Route::new(RouteCategory::Unclear, 0.0);
        }

        if patterns.command.is_match(&t) {
            return Route::new(RouteCategory::Conversational, 1.0);
        }
        if patterns.nurse.is_match(&t) {
            return Route::new(RouteCategory::Nurse, 1.0);
        }

        let clinical = Self::clinical_score(patterns, &t);
        let conversational = Self::conversational_score(patterns, &t);
        if clinical > conversational {
            return Route::new(RouteCategory::Clinical, clinical);
        }
        if conversational > 0.5 {
            return Route::new(RouteCategory::Conversational, conversational);
        }
        if t.split_whitespace().count() > 4 {
            return Route::new(RouteCategory::Clinical, 0.6);
        }
        Route::new(RouteCategory::Unclear, 0.3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinical_router_always_clinical() {
        for text in ["hello", "", "when did it start"] {
            assert_eq!(ClinicalRouter.route(text).category, RouteCategory::Clinical);
        }
    }

    #[test]
    fn patterns_compile() {
        assert!(PATTERNS.is_some());
    }

    #[test]
    fn greeting_is_conversational() {
        let r = KeywordRouter.route("Good morning");
        assert_eq!(r.category, RouteCategory::Conversational);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn commands_and_nurse() {
        assert_eq!(KeywordRouter.route("please stop").category, RouteCategory::Conversational);
        assert_eq!(KeywordRouter.route("Nurse, an ECG please").category, RouteCategory::Nurse);
    }

    #[test]
    fn clinical_question_scores_clinical() {
        let r = KeywordRouter.route("When did the chest pain start?");
        assert_eq!(r.category, RouteCategory::Clinical);
        assert!(r.confidence > 0.5);
    }

    #[test]
    fn short_gibberish_is_unclear() {
        assert_eq!(KeywordRouter.route("blorp").category, RouteCategory::Unclear);
        assert_eq!(KeywordRouter.route("   ").category, RouteCategory::Unclear);
    }

    #[test]
    fn long_unscored_text_is_clinical() {
        let r = KeywordRouter.route("zed quix blorp flarn wib snu");
        assert_eq!(r.category, RouteCategory::Clinical);
        assert_eq!(r.confidence, 0.6);
    }
}
