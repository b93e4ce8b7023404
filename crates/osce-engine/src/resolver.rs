//! Canonical fact text for each intent.
//!
//! Every fact intent maps to one path under the case `truth` and a canned
//! default for when the field is absent or blank. The match in [`resolve`] is
//! exhaustive over [`IntentCode`], so a new intent does not compile until it
//! is given a mapping here.

use serde::Serialize;
use serde_json::Value;

use osce_core::case::{CaseKnowledge, SocialHistory, Vitals};
use osce_core::intent::IntentCode;

pub const NOT_UNDERSTOOD: &str = "I'm sorry, I don't understand what you mean. Could you ask another way?";

const IMAGING_KEYS: &[&str] = &["CXR", "Echo", "CT", "MRI", "X-ray"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactResult {
    pub text: String,
    /// Dotted path of the field the text came from.
    pub source_path: String,
    /// False when `text` is a canned default.
    pub found: bool,
}

impl FactResult {
    fn found(text: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_path: path.into(),
            found: true,
        }
    }

    fn canned(text: &str, path: impl Into<String>) -> Self {
        Self {
            text: text.to_owned(),
            source_path: path.into(),
            found: false,
        }
    }
}

/// `field` if it holds text, otherwise the default.
fn text_or(field: &Option<String>, path: &str, default: &str) -> FactResult {
    match non_blank(field) {
        Some(text) => FactResult::found(text, path),
        None => FactResult::canned(default, path),
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn resolve(intent: IntentCode, case: &CaseKnowledge) -> FactResult {
    let truth = &case.truth;
    let history = &truth.history;
    let exam = &truth.physical_exam;

    match intent {
        IntentCode::Greeting => FactResult::found("Hello doctor.", "greeting"),

        // Presenting complaint
        IntentCode::AskChiefComplaint => text_or(
            &history.chief_complaint,
            "truth.history.chief_complaint",
            "I'm not feeling well.",
        ),
        IntentCode::AskOnset => text_or(&history.onset, "truth.history.onset", "It started recently."),
        IntentCode::AskDuration => {
            text_or(&history.duration, "truth.history.duration", "It's been a while now.")
        }
        IntentCode::AskCharacter => match non_blank(&history.character) {
            Some(text) => FactResult::found(text, "truth.history.character"),
            None => text_or(
                &history.description,
                "truth.history.description",
                "It's hard to describe.",
            ),
        },
        IntentCode::AskRadiation => {
            text_or(&history.radiation, "truth.history.radiation", "It doesn't go anywhere.")
        }
        IntentCode::AskAssociatedSymptoms => {
            let path = "truth.history.associated_symptoms";
            match natural_join(&history.associated_symptoms) {
                Some(list) => FactResult::found(format!("I also have {list}."), path),
                None => FactResult::canned("No other symptoms.", path),
            }
        }
        IntentCode::AskExacerbatingFactors => text_or(
            &history.exacerbating_factors,
            "truth.history.exacerbating_factors",
            "Nothing makes it worse.",
        ),
        IntentCode::AskRelievingFactors => text_or(
            &history.relieving_factors,
            "truth.history.relieving_factors",
            "Nothing really helps.",
        ),
        IntentCode::AskSeverity => text_or(&history.severity, "truth.history.severity", "It's quite bad."),

        // Background
        IntentCode::AskPastMedicalHistory => text_or(
            &truth.past_medical_history,
            "truth.past_medical_history",
            "I'm generally healthy.",
        ),
        IntentCode::AskMedications => text_or(
            &truth.medications,
            "truth.medications",
            "I don't take any medication.",
        ),
        IntentCode::AskAllergies => text_or(&truth.allergies, "truth.allergies", "No allergies."),
        IntentCode::AskSocialHistory => {
            let path = "truth.social_history";
            match truth.social_history.as_ref().and_then(flatten_social) {
                Some(text) => FactResult::found(text, path),
                None => FactResult::canned("I live at home and I don't smoke.", path),
            }
        }
        IntentCode::AskFamilyHistory => text_or(
            &truth.family_history,
            "truth.family_history",
            "No relevant family history.",
        ),
        IntentCode::AskDemographics => demographics(case),
        IntentCode::AskDiet => social_field(
            case,
            &["diet", "eat", "food"],
            "truth.social_history.diet",
            "I eat a fairly normal diet.",
        ),
        IntentCode::AskLifestyle => social_field(
            case,
            &["exercise", "activity", "lifestyle", "hobb"],
            "truth.social_history.lifestyle",
            "I try to stay reasonably active.",
        ),
        IntentCode::AskIdeas => text_or(
            &truth.ice.ideas,
            "truth.ice.ideas",
            "I'm not really sure what's causing it.",
        ),
        IntentCode::AskConcerns => text_or(
            &truth.ice.concerns,
            "truth.ice.concerns",
            "I'm just worried it might be something serious.",
        ),
        IntentCode::AskExpectations => text_or(
            &truth.ice.expectations,
            "truth.ice.expectations",
            "I'm hoping you can tell me what's going on.",
        ),

        // Examination
        IntentCode::PerformExamGeneral => text_or(
            &exam.general,
            "truth.physical_exam.general",
            "Patient appears comfortable.",
        ),
        IntentCode::PerformExamCardio => text_or(
            &exam.cardiovascular,
            "truth.physical_exam.cardiovascular",
            "Heart sounds normal. No murmurs.",
        ),
        IntentCode::PerformExamResp => text_or(
            &exam.respiratory,
            "truth.physical_exam.respiratory",
            "Breath sounds clear bilaterally.",
        ),
        IntentCode::PerformExamAbdo => text_or(
            &exam.abdomen,
            "truth.physical_exam.abdomen",
            "Abdomen soft, non-tender.",
        ),
        IntentCode::PerformExamNeuro => text_or(
            &exam.neurological,
            "truth.physical_exam.neurological",
            "Neurological examination normal.",
        ),
        IntentCode::CheckVitals => {
            let path = "truth.physical_exam.vitals";
            match exam.vitals.as_ref().and_then(format_vitals) {
                Some(text) => FactResult::found(text, path),
                None => FactResult::canned("Vitals are within normal limits.", path),
            }
        }

        // Investigations
        IntentCode::RequestEcg => {
            let path = "truth.investigations.bedside.ECG";
            match truth.investigations.bedside("ECG").and_then(value_text) {
                Some(text) => FactResult::found(text, path),
                None => FactResult::canned("ECG appears normal.", path),
            }
        }
        IntentCode::RequestTroponin => {
            let inv = &truth.investigations;
            if let Some(text) = inv.bedside("Troponin").and_then(value_text) {
                FactResult::found(text, "truth.investigations.bedside.Troponin")
            } else if let Some(text) = inv.confirmatory("Troponin").and_then(value_text) {
                FactResult::found(text, "truth.investigations.confirmatory.Troponin")
            } else {
                FactResult::canned("Troponin levels normal.", "truth.investigations.bedside.Troponin")
            }
        }
        IntentCode::RequestLabs => {
            let path = "truth.investigations.confirmatory";
            let sentences: Vec<String> = truth
                .investigations
                .confirmatory
                .iter()
                .filter(|(name, _)| !is_imaging(name))
                .filter_map(|(name, value)| value_text(value).map(|v| format!("{name}: {v}")))
                .collect();
            if sentences.is_empty() {
                FactResult::canned("Laboratory results pending.", path)
            } else {
                FactResult::found(sentences_of(sentences), path)
            }
        }
        IntentCode::RequestImaging => IMAGING_KEYS
            .iter()
            .find_map(|key| {
                let text = truth.investigations.confirmatory(key).and_then(value_text)?;
                Some(FactResult::found(text, format!("truth.investigations.confirmatory.{key}")))
            })
            .unwrap_or_else(|| {
                FactResult::canned("Imaging results pending.", "truth.investigations.confirmatory")
            }),

        IntentCode::Clinical
        | IntentCode::Conversational
        | IntentCode::Unclear
        | IntentCode::NurseCommand
        | IntentCode::Unknown => FactResult::canned(NOT_UNDERSTOOD, "none"),
    }
}

fn demographics(case: &CaseKnowledge) -> FactResult {
    let demo = &case.truth.demographics;
    let path = "truth.demographics";
    let occupation = non_blank(&demo.occupation);
    let text = match (demo.age, occupation) {
        (Some(age), Some(job)) => format!("I am {age} years old and my occupation is {job}."),
        (Some(age), None) => format!("I am {age} years old."),
        (None, Some(job)) => format!("My occupation is {job}."),
        (None, None) => return FactResult::canned("I'm an adult, doctor.", path),
    };
    FactResult::found(text, path)
}

fn social_field(case: &CaseKnowledge, needles: &[&str], path: &str, default: &str) -> FactResult {
    let text = case
        .truth
        .social_history
        .as_ref()
        .and_then(|social| social.field(needles))
        .and_then(value_text);
    match text {
        Some(text) => FactResult::found(text, path),
        None => FactResult::canned(default, path),
    }
}

/// Free text passes through; keyed records become "Key: value." sentences.
fn flatten_social(social: &SocialHistory) -> Option<String> {
    match social {
        SocialHistory::Text(text) => Some(text.trim()).filter(|t| !t.is_empty()).map(str::to_owned),
        SocialHistory::Fields(map) => {
            let sentences: Vec<String> = map
                .iter()
                .filter_map(|(key, value)| value_text(value).map(|v| format!("{}: {v}", humanize_key(key))))
                .collect();
            (!sentences.is_empty()).then(|| sentences_of(sentences))
        }
    }
}

fn humanize_key(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Join sentences with ". " and close with a full stop.
fn sentences_of(parts: Vec<String>) -> String {
    let mut out = parts
        .iter()
        .map(|p| p.trim_end_matches('.'))
        .collect::<Vec<_>>()
        .join(". ");
    out.push('.');
    out
}

/// Render a JSON value as prose. Blank strings and nulls are absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_owned),
        Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_owned()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().filter_map(value_text).collect();
            natural_join(&items)
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter_map(|(k, v)| value_text(v).map(|v| format!("{k}: {v}")))
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
    }
}

/// "a", "a and b", "a, b and c". Blank items are skipped.
pub fn natural_join<S: AsRef<str>>(items: &[S]) -> Option<String> {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect();
    match items.as_slice() {
        [] => None,
        [one] => Some((*one).to_owned()),
        [init @ .., last] => Some(format!("{} and {last}", init.join(", "))),
    }
}

fn format_vitals(v: &Vitals) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(hr) = v.hr {
        parts.push(format!("HR {hr} bpm"));
    }
    if let Some(bp) = v.bp.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(format!("BP {bp} mmHg"));
    }
    if let Some(rr) = v.rr {
        parts.push(format!("RR {rr}/min"));
    }
    if let Some(spo2) = v.spo2 {
        parts.push(format!("SpO2 {spo2}%"));
    }
    if let Some(temp) = v.temp {
        parts.push(format!("Temp {temp:.1}°C"));
    }
    (!parts.is_empty()).then(|| format!("{}.", parts.join(", ")))
}

fn is_imaging(name: &str) -> bool {
    IMAGING_KEYS.iter().any(|k| k.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(truth: Value) -> CaseKnowledge {
        serde_json::from_value(json!({ "truth": truth })).unwrap()
    }

    #[test]
    fn blank_allergies_use_default() {
        let r = resolve(IntentCode::AskAllergies, &case(json!({ "allergies": "" })));
        assert_eq!(r.text, "No allergies.");
        assert!(!r.found);
        assert_eq!(r.source_path, "truth.allergies");
    }

    #[test]
    fn present_field_is_found() {
        let r = resolve(IntentCode::AskOnset, &case(json!({ "history": { "onset": "Two hours ago." } })));
        assert_eq!(r.text, "Two hours ago.");
        assert!(r.found);
    }

    #[test]
    fn character_falls_back_to_description() {
        let c = case(json!({ "history": { "description": "Crushing, like a weight." } }));
        let r = resolve(IntentCode::AskCharacter, &c);
        assert_eq!(r.text, "Crushing, like a weight.");
        assert_eq!(r.source_path, "truth.history.description");
    }

    #[test]
    fn associated_symptoms_are_joined() {
        let c = case(json!({ "history": { "associated_symptoms": ["sweating", "nausea", "breathlessness"] } }));
        let r = resolve(IntentCode::AskAssociatedSymptoms, &c);
        assert_eq!(r.text, "I also have sweating, nausea and breathlessness.");
        let r = resolve(IntentCode::AskAssociatedSymptoms, &CaseKnowledge::default());
        assert_eq!(r.text, "No other symptoms.");
    }

    #[test]
    fn social_history_map_is_flattened() {
        let c = case(json!({ "social_history": { "smoking": "20 a day", "alcohol_use": "Weekends only." } }));
        let r = resolve(IntentCode::AskSocialHistory, &c);
        assert_eq!(r.text, "Alcohol use: Weekends only. Smoking: 20 a day.");
        assert!(r.found);
    }

    #[test]
    fn diet_reads_social_history_key() {
        let c = case(json!({ "social_history": { "diet": "Lots of takeaways" } }));
        assert_eq!(resolve(IntentCode::AskDiet, &c).text, "Lots of takeaways");
        let c = case(json!({ "social_history": "Lives alone." }));
        assert!(!resolve(IntentCode::AskDiet, &c).found);
    }

    #[test]
    fn demographics_sentence() {
        let c = case(json!({ "demographics": { "age": 58, "occupation": "bus driver" } }));
        assert_eq!(
            resolve(IntentCode::AskDemographics, &c).text,
            "I am 58 years old and my occupation is bus driver."
        );
    }

    #[test]
    fn vitals_are_formatted() {
        let c = case(json!({ "physical_exam": { "vitals": { "hr": 110, "bp": "150/90", "spo2": 94, "temp": 37.2 } } }));
        assert_eq!(
            resolve(IntentCode::CheckVitals, &c).text,
            "HR 110 bpm, BP 150/90 mmHg, SpO2 94%, Temp 37.2°C."
        );
    }

    #[test]
    fn labs_exclude_imaging_and_imaging_picks_first_key() {
        let c = case(json!({ "investigations": { "confirmatory": {
            "FBC": "Hb 135",
            "CXR": "Clear lung fields",
            "Troponin": "Raised at 450"
        } } }));
        let labs = resolve(IntentCode::RequestLabs, &c);
        assert_eq!(labs.text, "FBC: Hb 135. Troponin: Raised at 450.");
        let imaging = resolve(IntentCode::RequestImaging, &c);
        assert_eq!(imaging.text, "Clear lung fields");
        assert_eq!(imaging.source_path, "truth.investigations.confirmatory.CXR");
        let trop = resolve(IntentCode::RequestTroponin, &c);
        assert_eq!(trop.source_path, "truth.investigations.confirmatory.Troponin");
    }

    #[test]
    fn ecg_lookup_is_case_insensitive() {
        let c = case(json!({ "investigations": { "bedside": { "ecg": "ST elevation in II, III, aVF" } } }));
        assert_eq!(resolve(IntentCode::RequestEcg, &c).text, "ST elevation in II, III, aVF");
    }

    #[test]
    fn non_fact_intents_are_not_understood() {
        for intent in IntentCode::ALL.into_iter().filter(|i| !i.is_fact()) {
            let r = resolve(intent, &CaseKnowledge::default());
            assert_eq!(r.text, NOT_UNDERSTOOD);
            assert!(!r.found);
        }
    }

    #[test]
    fn every_intent_yields_text_on_empty_case() {
        for intent in IntentCode::ALL {
            assert!(!resolve(intent, &CaseKnowledge::default()).text.is_empty());
        }
    }

    #[test]
    fn natural_join_shapes() {
        assert_eq!(natural_join::<&str>(&[]), None);
        assert_eq!(natural_join(&["a"]).as_deref(), Some("a"));
        assert_eq!(natural_join(&["a", " ", "b"]).as_deref(), Some("a and b"));
    }
}
