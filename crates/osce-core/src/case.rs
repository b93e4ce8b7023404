//! Read-only scenario knowledge.
//!
//! Mirrors the on-disk case document: metadata, the candidate-facing scenario
//! and the hidden `truth` the simulated patient answers from. Every field is
//! optional on input so that sparse authoring never fails to load; the fact
//! resolver supplies canned defaults for anything absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseKnowledge {
    #[serde(default)]
    pub case_metadata: CaseMetadata,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default)]
    pub truth: CaseTruth,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseMetadata {
    pub case_id: String,
    pub title: String,
    pub specialty: Option<String>,
    pub difficulty: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub station_type: Option<String>,
    pub candidate_instructions: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseTruth {
    pub demographics: Demographics,
    pub final_diagnosis: Option<String>,
    pub emotional_state: Option<String>,
    pub history: PresentingHistory,
    pub past_medical_history: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub social_history: Option<SocialHistory>,
    pub family_history: Option<String>,
    pub ice: Ice,
    pub physical_exam: PhysicalExam,
    pub investigations: Investigations,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub occupation: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentingHistory {
    pub chief_complaint: Option<String>,
    pub onset: Option<String>,
    pub duration: Option<String>,
    pub character: Option<String>,
    pub description: Option<String>,
    pub radiation: Option<String>,
    pub associated_symptoms: Vec<String>,
    pub exacerbating_factors: Option<String>,
    pub relieving_factors: Option<String>,
    pub severity: Option<String>,
    pub risk_factors: Vec<String>,
}

/// Free text, or a keyed record such as `{"smoking": "20 a day"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocialHistory {
    Text(String),
    Fields(BTreeMap<String, Value>),
}

impl SocialHistory {
    /// Look up a keyed entry whose name contains any of `needles`.
    pub fn field(&self, needles: &[&str]) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Fields(map) => map.iter().find_map(|(key, value)| {
                let key = key.to_ascii_lowercase();
                needles.iter().any(|n| key.contains(n)).then_some(value)
            }),
        }
    }
}

/// Ideas, concerns and expectations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ice {
    pub ideas: Option<String>,
    pub concerns: Option<String>,
    pub expectations: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalExam {
    pub general: Option<String>,
    pub cardiovascular: Option<String>,
    pub respiratory: Option<String>,
    pub abdomen: Option<String>,
    pub neurological: Option<String>,
    pub vitals: Option<Vitals>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    pub hr: Option<u32>,
    pub bp: Option<String>,
    pub rr: Option<u32>,
    pub spo2: Option<u32>,
    pub temp: Option<f32>,
}

/// Results keyed by test name. Values are usually strings but authors
/// sometimes nest objects or lists, so they stay as raw JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Investigations {
    pub bedside: BTreeMap<String, Value>,
    pub confirmatory: BTreeMap<String, Value>,
}

impl Investigations {
    pub fn bedside(&self, name: &str) -> Option<&Value> {
        lookup_ci(&self.bedside, name)
    }

    pub fn confirmatory(&self, name: &str) -> Option<&Value> {
        lookup_ci(&self.confirmatory, name)
    }
}

fn lookup_ci<'a>(map: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Value> {
    map.get(name)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

impl CaseKnowledge {
    pub fn case_id(&self) -> &str {
        &self.case_metadata.case_id
    }
}
