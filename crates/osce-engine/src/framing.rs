//! System framing for a conversation context.
//!
//! Built once when a context is created. The nurse persona never sees the
//! case knowledge, only the stage. The knowledge excerpt is cumulative:
//! each stage sees what earlier stages could discuss plus its own section.
//! Advancing the stage invalidates the cached context so the next one is
//! framed with the wider excerpt.

use serde_json::{json, Map, Value};

use osce_core::case::CaseKnowledge;
use osce_core::stage::StageName;

const TONE_RULES: &str = "\
- Speak as the patient, in plain lay language. Never use medical jargon you would not know.
- Keep answers short: one to three sentences.
- Answer only what was asked. Do not volunteer the rest of your history.
- Stay in character. Never mention that you are an AI, a simulation or a case file.
- Small talk is fine, but steer back to how you are feeling.";

const GROUNDING_RULE: &str = "\
Only use facts from the PATIENT KNOWLEDGE block. If asked about something it does not cover, \
say you are not sure or that it is normal for you. Never invent symptoms, results or history.";

const NURSE_FRAMING: &str = "\
You are Nurse Sarah, a clinical nurse assisting a medical student in an OSCE station. \
You are calm, supportive and efficient.
- When the student gives you an order, acknowledge it and confirm you are carrying it out.
- You do not diagnose and you do not report results. The student makes the decisions.
- Keep replies to one or two sentences and address the student as doctor.";

/// Who a conversation context speaks as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Persona {
    #[default]
    Patient,
    Nurse,
}

impl Persona {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Nurse => "nurse",
        }
    }

    pub fn framing(self, case: &CaseKnowledge, stage: StageName) -> String {
        match self {
            Self::Patient => build_framing(case, stage),
            Self::Nurse => build_nurse_framing(stage),
        }
    }
}

pub fn build_nurse_framing(stage: StageName) -> String {
    format!("{NURSE_FRAMING}\n\nThe exam is currently in the {stage} stage.")
}

pub fn build_framing(case: &CaseKnowledge, stage: StageName) -> String {
    let excerpt = serde_json::to_string_pretty(&stage_excerpt(case, stage)).unwrap_or_default();
    format!(
        "{persona}\n\nThe exam is currently in the {stage} stage.\n\nPATIENT KNOWLEDGE:\n{excerpt}\n\nTONE RULES:\n{TONE_RULES}\n\nGROUNDING RULE:\n{GROUNDING_RULE}",
        persona = persona_line(case),
    )
}

/// Opening persona sentence from the demographics and emotional state.
pub fn persona_line(case: &CaseKnowledge) -> String {
    let truth = &case.truth;
    let mut who = Vec::new();
    if let Some(age) = truth.demographics.age {
        who.push(format!("{age}-year-old"));
    }
    if let Some(sex) = truth.demographics.sex.as_deref().filter(|s| !s.trim().is_empty()) {
        who.push(sex.trim().to_lowercase());
    }
    who.push("patient".to_owned());

    let mut line = format!("You are a {}", who.join(" "));
    if let Some(job) = truth.demographics.occupation.as_deref().map(strip_parenthetical) {
        if !job.is_empty() {
            line.push_str(&format!(" who works as {job}"));
        }
    }
    line.push('.');
    if let Some(mood) = truth.emotional_state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        line.push_str(&format!(" You are feeling {mood}."));
    }
    line
}

/// "Plumber (retired)" becomes "Plumber".
fn strip_parenthetical(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn stage_excerpt(case: &CaseKnowledge, stage: StageName) -> Value {
    let truth = &case.truth;
    let mut excerpt = Map::new();

    excerpt.insert("presenting_history".into(), to_value(&truth.history));
    excerpt.insert(
        "background".into(),
        json!({
            "demographics": to_value(&truth.demographics),
            "past_medical_history": to_value(&truth.past_medical_history),
            "medications": to_value(&truth.medications),
            "allergies": to_value(&truth.allergies),
            "social_history": to_value(&truth.social_history),
            "family_history": to_value(&truth.family_history),
            "ideas_concerns_expectations": to_value(&truth.ice),
        }),
    );
    if stage >= StageName::Examination {
        excerpt.insert("physical_exam".into(), to_value(&truth.physical_exam));
    }
    if stage >= StageName::Investigations {
        excerpt.insert("investigations".into(), to_value(&truth.investigations));
    }
    if stage >= StageName::Management {
        excerpt.insert("final_diagnosis".into(), to_value(&truth.final_diagnosis));
    }
    Value::Object(excerpt)
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
