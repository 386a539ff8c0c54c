//! Teaching modes and feedback values

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Teaching mode presented to a learner
///
/// Declaration order doubles as the tie-break priority when two modes
/// draw the same Thompson sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeId {
    Quiz,
    Flashcard,
    Interactive,
}

impl ModeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Flashcard => "flashcard",
            Self::Interactive => "interactive",
        }
    }

    /// All modes in priority order
    pub fn all() -> &'static [ModeId] {
        &[Self::Quiz, Self::Flashcard, Self::Interactive]
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeId {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiz" => Ok(Self::Quiz),
            "flashcard" => Ok(Self::Flashcard),
            "interactive" => Ok(Self::Interactive),
            _ => Err(PolicyError::InvalidMode(s.to_string())),
        }
    }
}

/// Observed learner feedback for one presentation of a mode
///
/// Deserializes from a JSON boolean or a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feedback {
    Binary(bool),
    Score(f64),
}

impl Feedback {
    /// Reward in `[0, 1]` credited to the mode's success parameter
    pub fn reward(&self) -> Result<f64, PolicyError> {
        match *self {
            Self::Binary(true) => Ok(1.0),
            Self::Binary(false) => Ok(0.0),
            Self::Score(score) if score.is_finite() && (0.0..=1.0).contains(&score) => Ok(score),
            Self::Score(score) => Err(PolicyError::InvalidFeedback(score)),
        }
    }
}

impl From<bool> for Feedback {
    fn from(value: bool) -> Self {
        Self::Binary(value)
    }
}

impl From<f64> for Feedback {
    fn from(value: f64) -> Self {
        Self::Score(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_is_case_insensitive() {
        assert_eq!("Quiz".parse::<ModeId>().unwrap(), ModeId::Quiz);
        assert_eq!(" flashcard ".parse::<ModeId>().unwrap(), ModeId::Flashcard);
        assert_eq!(
            "lecture".parse::<ModeId>(),
            Err(PolicyError::InvalidMode("lecture".into()))
        );
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ModeId::Interactive).unwrap(),
            "\"interactive\""
        );
    }

    #[test]
    fn test_all_modes_in_declaration_order() {
        let mut sorted = ModeId::all().to_vec();
        sorted.sort();
        assert_eq!(sorted, ModeId::all());
    }

    #[test]
    fn test_feedback_from_json() {
        let fb: Feedback = serde_json::from_str("true").unwrap();
        assert_eq!(fb, Feedback::Binary(true));
        let fb: Feedback = serde_json::from_str("0.25").unwrap();
        assert_eq!(fb, Feedback::Score(0.25));
        let fb: Feedback = serde_json::from_str("1").unwrap();
        assert_eq!(fb, Feedback::Score(1.0));
    }

    #[test]
    fn test_feedback_reward_bounds() {
        assert_eq!(Feedback::Binary(false).reward(), Ok(0.0));
        assert_eq!(Feedback::Score(0.7).reward(), Ok(0.7));
        assert_eq!(
            Feedback::Score(1.5).reward(),
            Err(PolicyError::InvalidFeedback(1.5))
        );
        assert!(Feedback::Score(f64::NAN).reward().is_err());
        assert!(Feedback::Score(-0.1).reward().is_err());
    }
}
