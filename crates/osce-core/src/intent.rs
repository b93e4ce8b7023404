use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed vocabulary of topics a trainee message can be about.
///
/// The label set is shared with the classifier instruction prompt, so adding a
/// variant means adding it to [`IntentCode::ALL`] as well; the exhaustive
/// matches below will not compile otherwise.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentCode {
    Greeting,
    AskChiefComplaint,
    AskOnset,
    AskDuration,
    AskCharacter,
    AskRadiation,
    AskAssociatedSymptoms,
    AskExacerbatingFactors,
    AskRelievingFactors,
    AskSeverity,
    AskPastMedicalHistory,
    AskMedications,
    AskAllergies,
    AskSocialHistory,
    AskFamilyHistory,
    AskDemographics,
    AskDiet,
    AskLifestyle,
    AskIdeas,
    AskConcerns,
    AskExpectations,
    PerformExamGeneral,
    PerformExamCardio,
    PerformExamResp,
    PerformExamAbdo,
    PerformExamNeuro,
    CheckVitals,
    RequestEcg,
    RequestTroponin,
    RequestLabs,
    RequestImaging,
    #[serde(alias = "CLINICAL_INTENT")]
    Clinical,
    #[serde(alias = "CONVERSATIONAL_INTENT")]
    Conversational,
    #[serde(alias = "UNCLEAR_INTENT")]
    Unclear,
    NurseCommand,
    Unknown,
}

/// Topic families the stage policy reasons about.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentGroup {
    History,
    Exam,
    Investigation,
}

impl IntentCode {
    pub const ALL: [IntentCode; 36] = [
        Self::Greeting,
        Self::AskChiefComplaint,
        Self::AskOnset,
        Self::AskDuration,
        Self::AskCharacter,
        Self::AskRadiation,
        Self::AskAssociatedSymptoms,
        Self::AskExacerbatingFactors,
        Self::AskRelievingFactors,
        Self::AskSeverity,
        Self::AskPastMedicalHistory,
        Self::AskMedications,
        Self::AskAllergies,
        Self::AskSocialHistory,
        Self::AskFamilyHistory,
        Self::AskDemographics,
        Self::AskDiet,
        Self::AskLifestyle,
        Self::AskIdeas,
        Self::AskConcerns,
        Self::AskExpectations,
        Self::PerformExamGeneral,
        Self::PerformExamCardio,
        Self::PerformExamResp,
        Self::PerformExamAbdo,
        Self::PerformExamNeuro,
        Self::CheckVitals,
        Self::RequestEcg,
        Self::RequestTroponin,
        Self::RequestLabs,
        Self::RequestImaging,
        Self::Clinical,
        Self::Conversational,
        Self::Unclear,
        Self::NurseCommand,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::AskChiefComplaint => "ASK_CHIEF_COMPLAINT",
            Self::AskOnset => "ASK_ONSET",
            Self::AskDuration => "ASK_DURATION",
            Self::AskCharacter => "ASK_CHARACTER",
            Self::AskRadiation => "ASK_RADIATION",
            Self::AskAssociatedSymptoms => "ASK_ASSOCIATED_SYMPTOMS",
            Self::AskExacerbatingFactors => "ASK_EXACERBATING_FACTORS",
            Self::AskRelievingFactors => "ASK_RELIEVING_FACTORS",
            Self::AskSeverity => "ASK_SEVERITY",
            Self::AskPastMedicalHistory => "ASK_PAST_MEDICAL_HISTORY",
            Self::AskMedications => "ASK_MEDICATIONS",
            Self::AskAllergies => "ASK_ALLERGIES",
            Self::AskSocialHistory => "ASK_SOCIAL_HISTORY",
            Self::AskFamilyHistory => "ASK_FAMILY_HISTORY",
            Self::AskDemographics => "ASK_DEMOGRAPHICS",
            Self::AskDiet => "ASK_DIET",
            Self::AskLifestyle => "ASK_LIFESTYLE",
            Self::AskIdeas => "ASK_IDEAS",
            Self::AskConcerns => "ASK_CONCERNS",
            Self::AskExpectations => "ASK_EXPECTATIONS",
            Self::PerformExamGeneral => "PERFORM_EXAM_GENERAL",
            Self::PerformExamCardio => "PERFORM_EXAM_CARDIO",
            Self::PerformExamResp => "PERFORM_EXAM_RESP",
            Self::PerformExamAbdo => "PERFORM_EXAM_ABDO",
            Self::PerformExamNeuro => "PERFORM_EXAM_NEURO",
            Self::CheckVitals => "CHECK_VITALS",
            Self::RequestEcg => "REQUEST_ECG",
            Self::RequestTroponin => "REQUEST_TROPONIN",
            Self::RequestLabs => "REQUEST_LABS",
            Self::RequestImaging => "REQUEST_IMAGING",
            Self::Clinical => "CLINICAL",
            Self::Conversational => "CONVERSATIONAL",
            Self::Unclear => "UNCLEAR",
            Self::NurseCommand => "NURSE_COMMAND",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a classifier label. Accepts the legacy `*_INTENT` spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        match label {
            "CLINICAL_INTENT" => return Some(Self::Clinical),
            "CONVERSATIONAL_INTENT" => return Some(Self::Conversational),
            "UNCLEAR_INTENT" => return Some(Self::Unclear),
            _ => {}
        }
        Self::ALL.into_iter().find(|code| code.as_str() == label)
    }

    pub fn group(self) -> Option<IntentGroup> {
        match self {
            Self::AskChiefComplaint
            | Self::AskOnset
            | Self::AskDuration
            | Self::AskCharacter
            | Self::AskRadiation
            | Self::AskAssociatedSymptoms
            | Self::AskExacerbatingFactors
            | Self::AskRelievingFactors
            | Self::AskSeverity
            | Self::AskPastMedicalHistory
            | Self::AskMedications
            | Self::AskAllergies
            | Self::AskSocialHistory
            | Self::AskFamilyHistory
            | Self::AskDemographics
            | Self::AskDiet
            | Self::AskLifestyle
            | Self::AskIdeas
            | Self::AskConcerns
            | Self::AskExpectations => Some(IntentGroup::History),
            Self::PerformExamGeneral
            | Self::PerformExamCardio
            | Self::PerformExamResp
            | Self::PerformExamAbdo
            | Self::PerformExamNeuro
            | Self::CheckVitals => Some(IntentGroup::Exam),
            Self::RequestEcg | Self::RequestTroponin | Self::RequestLabs | Self::RequestImaging => {
                Some(IntentGroup::Investigation)
            }
            Self::Greeting
            | Self::Clinical
            | Self::Conversational
            | Self::Unclear
            | Self::NurseCommand
            | Self::Unknown => None,
        }
    }

    /// Intents that are answerable at every stage.
    pub fn is_universal(self) -> bool {
        matches!(self, Self::Greeting | Self::Unknown)
    }

    /// Whether the intent maps onto a canonical case fact.
    pub fn is_fact(self) -> bool {
        self == Self::Greeting || self.group().is_some()
    }
}

impl fmt::Display for IntentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown intent label: {0}")]
pub struct UnknownIntent(pub String);

impl FromStr for IntentCode {
    type Err = UnknownIntent;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| UnknownIntent(s.to_owned()))
    }
}

/// One classification of one inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub intent: IntentCode,
    pub confidence: f32,
    pub original_query: String,
}

impl IntentResult {
    pub fn new(intent: IntentCode, confidence: f32, original_query: impl Into<String>) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            original_query: original_query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_roundtrip_through_from_label() {
        for code in IntentCode::ALL {
            assert_eq!(IntentCode::from_label(code.as_str()), Some(code));
        }
    }

    #[test]
    fn labels_match_serde_names() {
        for code in IntentCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn legacy_aliases_accepted() {
        assert_eq!(IntentCode::from_label("CONVERSATIONAL_INTENT"), Some(IntentCode::Conversational));
        assert_eq!(IntentCode::from_label("UNCLEAR_INTENT"), Some(IntentCode::Unclear));
        let parsed: IntentCode = serde_json::from_str("\"CLINICAL_INTENT\"").unwrap();
        assert_eq!(parsed, IntentCode::Clinical);
    }

    #[test]
    fn unknown_label_rejected() {
        assert_eq!(IntentCode::from_label("ASK_HOROSCOPE"), None);
        assert!("ask_onset".parse::<IntentCode>().is_err());
    }

    #[test]
    fn groups() {
        assert_eq!(IntentCode::AskOnset.group(), Some(IntentGroup::History));
        assert_eq!(IntentCode::CheckVitals.group(), Some(IntentGroup::Exam));
        assert_eq!(IntentCode::RequestTroponin.group(), Some(IntentGroup::Investigation));
        assert_eq!(IntentCode::Greeting.group(), None);
    }

    #[test]
    fn fact_intents() {
        assert!(IntentCode::Greeting.is_fact());
        assert!(IntentCode::AskAllergies.is_fact());
        assert!(!IntentCode::Clinical.is_fact());
        assert!(!IntentCode::NurseCommand.is_fact());
        assert!(!IntentCode::Unknown.is_fact());
    }

    #[test]
    fn confidence_is_clamped() {
        let r = IntentResult::new(IntentCode::AskOnset, 1.7, "when did it start");
        assert_eq!(r.confidence, 1.0);
        let r = IntentResult::new(IntentCode::Unclear, -0.2, "?");
        assert_eq!(r.confidence, 0.0);
    }
}
