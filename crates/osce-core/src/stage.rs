use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered phases of the simulated exam.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum StageName {
    #[default]
    History,
    Examination,
    Investigations,
    Management,
}

/// Outcome of asking a session to move to a stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageTransition {
    Advance,
    /// Target is the current or an earlier stage.
    Unchanged,
    /// Target skips at least one stage.
    Skip,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        Self::History,
        Self::Examination,
        Self::Investigations,
        Self::Management,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "History",
            Self::Examination => "Examination",
            Self::Investigations => "Investigations",
            Self::Management => "Management",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::History => Some(Self::Examination),
            Self::Examination => Some(Self::Investigations),
            Self::Investigations => Some(Self::Management),
            Self::Management => None,
        }
    }

    pub fn transition_to(self, target: Self) -> StageTransition {
        if target <= self {
            StageTransition::Unchanged
        } else if self.next() == Some(target) {
            StageTransition::Advance
        } else {
            StageTransition::Skip
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for StageName {
    type Err = UnknownStage;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStage(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(StageName::History < StageName::Examination);
        assert!(StageName::Investigations < StageName::Management);
        assert_eq!(StageName::default(), StageName::History);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("examination".parse::<StageName>().unwrap(), StageName::Examination);
        assert_eq!(" MANAGEMENT ".parse::<StageName>().unwrap(), StageName::Management);
        assert!("triage".parse::<StageName>().is_err());
    }

    #[test]
    fn transitions() {
        use StageTransition::*;
        assert_eq!(StageName::History.transition_to(StageName::Examination), Advance);
        assert_eq!(StageName::Examination.transition_to(StageName::History), Unchanged);
        assert_eq!(StageName::Examination.transition_to(StageName::Examination), Unchanged);
        assert_eq!(StageName::History.transition_to(StageName::Investigations), Skip);
        assert_eq!(StageName::Management.next(), None);
    }
}
