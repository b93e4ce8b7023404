//! Stage policy: which topics may be discussed at which point in the exam.
//!
//! Evaluation order:
//! 1. Universal intents (greeting, unknown) are always allowed.
//! 2. The stage's rule table: an entry either allows the intent's group or
//!    denies it with a trainee-facing reason.
//! 3. Anything without an entry is allowed. This leniency covers stages and
//!    intents the table does not mention (Management, small talk, generic
//!    clinical questions) and is not a security boundary.
//!
//! The gate holds no state, so the same (stage, intent) pair always yields
//! the same decision.

use serde::{Deserialize, Serialize};

use osce_core::intent::{IntentCode, IntentGroup};
use osce_core::stage::StageName;

pub const EXAM_NOT_READY: &str = "I'm not ready for a full physical exam yet. Let's finish talking about my symptoms first, and then we can examine that.";
pub const TESTS_BEFORE_HISTORY: &str = "We should finish the history before ordering tests.";
pub const TESTS_BEFORE_EXAM: &str = "Let's finish the examination before ordering tests.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    /// Present only when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// What the table says about one (stage, intent) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rule {
    Allow,
    Deny(&'static str),
}

/// Which intents a rule applies to. `Intent` entries are checked before
/// `Group` entries so a single exam can be carved out of a denied group.
#[derive(Clone, Copy, Debug)]
enum Scope {
    Intent(IntentCode),
    Group(IntentGroup),
}

const HISTORY_RULES: &[(Scope, Rule)] = &[
    (Scope::Intent(IntentCode::CheckVitals), Rule::Allow),
    (Scope::Intent(IntentCode::PerformExamGeneral), Rule::Allow),
    (Scope::Group(IntentGroup::History), Rule::Allow),
    (Scope::Group(IntentGroup::Exam), Rule::Deny(EXAM_NOT_READY)),
    (Scope::Group(IntentGroup::Investigation), Rule::Deny(TESTS_BEFORE_HISTORY)),
];

const EXAMINATION_RULES: &[(Scope, Rule)] = &[
    (Scope::Group(IntentGroup::History), Rule::Allow),
    (Scope::Group(IntentGroup::Exam), Rule::Allow),
    (Scope::Group(IntentGroup::Investigation), Rule::Deny(TESTS_BEFORE_EXAM)),
];

const INVESTIGATIONS_RULES: &[(Scope, Rule)] = &[
    (Scope::Group(IntentGroup::History), Rule::Allow),
    (Scope::Group(IntentGroup::Exam), Rule::Allow),
    (Scope::Group(IntentGroup::Investigation), Rule::Allow),
];

fn rules_for(stage: StageName) -> &'static [(Scope, Rule)] {
    match stage {
        StageName::History => HISTORY_RULES,
        StageName::Examination => EXAMINATION_RULES,
        StageName::Investigations => INVESTIGATIONS_RULES,
        StageName::Management => &[],
    }
}

fn lookup(table: &[(Scope, Rule)], intent: IntentCode) -> Option<Rule> {
    let exact = table.iter().find_map(|(scope, rule)| match scope {
        Scope::Intent(code) if *code == intent => Some(*rule),
        _ => None,
    });
    exact.or_else(|| {
        let group = intent.group()?;
        table.iter().find_map(|(scope, rule)| match scope {
            Scope::Group(g) if *g == group => Some(*rule),
            _ => None,
        })
    })
}

pub fn check(stage: StageName, intent: IntentCode) -> GateDecision {
    if intent.is_universal() {
        return GateDecision::allow();
    }
    match lookup(rules_for(stage), intent) {
        Some(Rule::Deny(reason)) => GateDecision::deny(reason),
        Some(Rule::Allow) | None => GateDecision::allow(),
    }
}
