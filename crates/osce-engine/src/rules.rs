//! Deterministic intent rules used when the primary classifier is unavailable
//! or returns a label outside the vocabulary.
//!
//! Two ordered tables, first match wins:
//! 1. Overrides: whole-word patterns for phrases the primary path commonly
//!    misfiles (small talk, identity questions, addressing the nurse).
//! 2. Keywords: stem patterns anchored only at the word start, so `allerg`
//!    matches "allergies" and "allergic".
//!
//! Anything left over is `UNCLEAR` with zero confidence.

use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

use osce_core::intent::{IntentCode, IntentResult};

pub const OVERRIDE_CONFIDENCE: f32 = 0.9;
pub const KEYWORD_CONFIDENCE: f32 = 0.8;

/// One compiled pattern and the intent it yields.
pub struct Rule {
    pattern: Regex,
    pub intent: IntentCode,
    pub confidence: f32,
}

impl Rule {
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

const OVERRIDES: &[(&str, IntentCode, f32)] = &[
    (
        r"hello|hi|hey|good|morning|evening|afternoon|thanks|thank|bye|how are you|how is it going",
        IntentCode::Conversational,
        OVERRIDE_CONFIDENCE,
    ),
    (r"name|who are you|introduce", IntentCode::Conversational, OVERRIDE_CONFIDENCE),
    (r"count", IntentCode::Clinical, KEYWORD_CONFIDENCE),
    (r"nurse|sister|medical assistant", IntentCode::NurseCommand, OVERRIDE_CONFIDENCE),
];

const KEYWORDS: &[(&str, IntentCode)] = &[
    // Examination requests read like history questions ("can I feel your
    // tummy"), so they are checked before the history stems.
    (r"vital|blood pressure|pulse|temperature|sats|oxygen level", IntentCode::CheckVitals),
    (r"auscultat|listen.*(heart|chest)|examine.*heart|cardiac exam|cardiovascular exam", IntentCode::PerformExamCardio),
    (r"listen.*lung|examine.*(chest|lung)|respiratory exam|breath sounds", IntentCode::PerformExamResp),
    (r"(examine|palpat|feel|press).*(abdo|tummy|stomach|belly)|abdominal exam", IntentCode::PerformExamAbdo),
    (r"reflex|cranial nerve|neuro|examine.*(eyes|limbs|arms|legs)", IntentCode::PerformExamNeuro),
    (r"general exam|examine you|look at you|inspect", IntentCode::PerformExamGeneral),
    // Ideas, concerns, expectations
    (r"what do you think|idea|theor", IntentCode::AskIdeas),
    (r"worr|concern|scared|afraid|fear", IntentCode::AskConcerns),
    (r"expect|hoping|hope", IntentCode::AskExpectations),
    // Presenting complaint
    (r"start|begin|onset|happen|occur|since|during", IntentCode::AskOnset),
    (r"long|duration|time|periods", IntentCode::AskDuration),
    (r"describe|feel|like|nature|character", IntentCode::AskCharacter),
    (r"radiat|move|spread|go|travel", IntentCode::AskRadiation),
    (
        r"why.*here|what.*bring|brings|matter|wrong|issue|help.*today|here.*today|reason|problem",
        IntentCode::AskChiefComplaint,
    ),
    (r"bad|score|scale|sever|metric", IntentCode::AskSeverity),
    (r"worse|aggrav|trigger|harder", IntentCode::AskExacerbatingFactors),
    (r"better|reliev|eas|help|improv", IntentCode::AskRelievingFactors),
    (r"else|other|symptom", IntentCode::AskAssociatedSymptoms),
    // Background
    (r"medication|pill|drug|tablet|prescri|take", IntentCode::AskMedications),
    (r"allerg|reaction", IntentCode::AskAllergies),
    (r"condition|illness|disease|history|past|operation|surger", IntentCode::AskPastMedicalHistory),
    (r"family|parent|mom|mum|dad|brother", IntentCode::AskFamilyHistory),
    (
        r"married|single|partner|relationship|spouse|smoke|drink|alcohol|work|job|home|live",
        IntentCode::AskSocialHistory,
    ),
    (r"diet|eat|food|appetite", IntentCode::AskDiet),
    (r"exercise|gym|sport|activ", IntentCode::AskLifestyle),
    (r"old|age|birthday|years|from|where.*from|origin|nationality", IntentCode::AskDemographics),
    // Investigations
    (r"ecg|ekg|trace|heart", IntentCode::RequestEcg),
    (r"trop", IntentCode::RequestTroponin),
    (r"lab|blood test|blood count|hemoglobin|haemoglobin|cbc|fbc|bmp", IntentCode::RequestLabs),
    (r"xray|x-ray|scan|mri|ct|imag|echo", IntentCode::RequestImaging),
    // Medical, but nothing more specific fit
    (
        r"pain|hurt|symptom|feel|history|exam|check|test|scan|blood|pill|med|listen|heart|lung|breath|sound|look|see",
        IntentCode::Clinical,
    ),
];

fn compile(source: &str, whole_word: bool) -> Option<Regex> {
    let pattern = if whole_word {
        format!(r"(?i)\b({source})\b")
    } else {
        format!(r"(?i)\b({source})")
    };
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!(pattern = %source, error = %e, "invalid intent rule, skipping");
            None
        }
    }
}

static OVERRIDE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    OVERRIDES
        .iter()
        .filter_map(|&(source, intent, confidence)| {
            compile(source, true).map(|pattern| Rule { pattern, intent, confidence })
        })
        .collect()
});

static KEYWORD_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    KEYWORDS
        .iter()
        .filter_map(|&(source, intent)| {
            compile(source, false).map(|pattern| Rule {
                pattern,
                intent,
                confidence: KEYWORD_CONFIDENCE,
            })
        })
        .collect()
});

/// All rules in evaluation order.
pub fn rules() -> impl Iterator<Item = &'static Rule> {
    OVERRIDE_RULES.iter().chain(KEYWORD_RULES.iter())
}

/// Run the cascade. Never fails; unmatched text is `UNCLEAR` at 0.
pub fn fallback_classify(text: &str) -> IntentResult {
    match rules().find(|rule| rule.matches(text)) {
        Some(rule) => IntentResult::new(rule.intent, rule.confidence, text),
        None => IntentResult::new(IntentCode::Unclear, 0.0, text),
    }
}
