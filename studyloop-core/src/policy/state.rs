//! Durable per-user bandit state
//!
//! [`PolicyState`] is the shape every store persists. [`RawPolicyState`]
//! is the lenient decode of whatever a store actually holds; it is turned
//! into a valid state by [`RawPolicyState::normalize`], which records each
//! repair it had to make.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::{Feedback, ModeId};

/// Beta prior applied to every mode on creation and reset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub success: f64,
    pub failure: f64,
}

impl Default for Prior {
    fn default() -> Self {
        Self {
            success: 1.0,
            failure: 1.0,
        }
    }
}

/// One feedback event in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub mode: ModeId,
    pub feedback: Feedback,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

/// Bandit parameters, history and survey flags for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    #[serde(rename = "mode_alpha")]
    pub mode_success: BTreeMap<ModeId, f64>,
    #[serde(rename = "mode_beta")]
    pub mode_failure: BTreeMap<ModeId, f64>,
    #[serde(rename = "mode_history")]
    pub history: Vec<HistoryEntry>,
    pub survey_completed: bool,
    pub initial_preference: Option<ModeId>,
    pub total_sessions: u64,
    #[serde(with = "iso8601::option")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self::with_prior(Prior::default())
    }
}

impl PolicyState {
    /// Fresh state with the uniform `Beta(1, 1)` prior on every mode
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prior(prior: Prior) -> Self {
        Self {
            mode_success: ModeId::all().iter().map(|m| (*m, prior.success)).collect(),
            mode_failure: ModeId::all().iter().map(|m| (*m, prior.failure)).collect(),
            history: Vec::new(),
            survey_completed: false,
            initial_preference: None,
            total_sessions: 0,
            last_updated: None,
        }
    }

    pub fn success(&self, mode: ModeId) -> f64 {
        self.mode_success.get(&mode).copied().unwrap_or(Prior::default().success)
    }

    pub fn failure(&self, mode: ModeId) -> f64 {
        self.mode_failure.get(&mode).copied().unwrap_or(Prior::default().failure)
    }

    /// Posterior mean `alpha / (alpha + beta)` for a mode
    pub fn mean(&self, mode: ModeId) -> f64 {
        let (alpha, beta) = (self.success(mode), self.failure(mode));
        alpha / (alpha + beta)
    }

    /// Check the structural invariants against a prior floor
    pub fn is_valid(&self, prior: Prior) -> bool {
        let covers = |map: &BTreeMap<ModeId, f64>, floor: f64| {
            map.len() == ModeId::all().len()
                && ModeId::all().iter().all(|m| {
                    map.get(m)
                        .is_some_and(|v| v.is_finite() && *v >= floor)
                })
        };
        covers(&self.mode_success, prior.success) && covers(&self.mode_failure, prior.failure)
    }
}

/// Which Beta parameter a repair touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Success,
    Failure,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("mode_alpha"),
            Self::Failure => f.write_str("mode_beta"),
        }
    }
}

/// A correction applied while normalizing a persisted record
#[derive(Debug, Clone, PartialEq)]
pub enum Repair {
    MissingMode { side: Side, mode: ModeId },
    BelowFloor { side: Side, mode: ModeId, value: f64 },
    UnknownMode { side: Side, key: String },
    UnknownPreference(String),
    NegativeSessions(i64),
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingMode { side, mode } => write!(f, "{side}.{mode} missing, backfilled"),
            Self::BelowFloor { side, mode, value } => {
                write!(f, "{side}.{mode}={value} below prior floor, reset")
            }
            Self::UnknownMode { side, key } => write!(f, "{side}.{key} is not a mode, dropped"),
            Self::UnknownPreference(p) => write!(f, "initial_preference {p:?} unknown, cleared"),
            Self::NegativeSessions(n) => write!(f, "total_sessions={n} negative, reset to 0"),
        }
    }
}

/// Lenient decode of a persisted policy record
///
/// Every field is optional and mode keys are plain strings, so records
/// written by older versions or edited by hand still decode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPolicyState {
    #[serde(default)]
    pub mode_alpha: HashMap<String, f64>,
    #[serde(default)]
    pub mode_beta: HashMap<String, f64>,
    #[serde(default)]
    pub mode_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub survey_completed: bool,
    #[serde(default)]
    pub initial_preference: Option<String>,
    #[serde(default)]
    pub total_sessions: i64,
    #[serde(default, deserialize_with = "iso8601::option::deserialize")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RawPolicyState {
    /// Build a valid [`PolicyState`], backfilling and clamping as needed
    pub fn normalize(self, prior: Prior) -> (PolicyState, Vec<Repair>) {
        let mut repairs = Vec::new();

        let mode_success = normalize_side(self.mode_alpha, Side::Success, prior.success, &mut repairs);
        let mode_failure = normalize_side(self.mode_beta, Side::Failure, prior.failure, &mut repairs);

        let initial_preference = match self.initial_preference {
            None => None,
            Some(p) if p.trim().is_empty() => None,
            Some(p) => match p.parse::<ModeId>() {
                Ok(mode) => Some(mode),
                Err(_) => {
                    repairs.push(Repair::UnknownPreference(p));
                    None
                }
            },
        };

        let total_sessions = if self.total_sessions < 0 {
            repairs.push(Repair::NegativeSessions(self.total_sessions));
            0
        } else {
            self.total_sessions as u64
        };

        let state = PolicyState {
            mode_success,
            mode_failure,
            history: self.mode_history,
            survey_completed: self.survey_completed,
            initial_preference,
            total_sessions,
            last_updated: self.last_updated,
        };
        (state, repairs)
    }
}

fn normalize_side(
    raw: HashMap<String, f64>,
    side: Side,
    floor: f64,
    repairs: &mut Vec<Repair>,
) -> BTreeMap<ModeId, f64> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        match key.parse::<ModeId>() {
            Ok(mode) if value.is_finite() && value >= floor => {
                out.insert(mode, value);
            }
            Ok(mode) => {
                repairs.push(Repair::BelowFloor { side, mode, value });
                out.insert(mode, floor);
            }
            Err(_) => repairs.push(Repair::UnknownMode { side, key }),
        }
    }
    for mode in ModeId::all() {
        if !out.contains_key(mode) {
            repairs.push(Repair::MissingMode { side, mode: *mode });
            out.insert(*mode, floor);
        }
    }
    out
}

/// ISO-8601 timestamps; accepts RFC 3339 and naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC)
pub(crate) mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {s}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(s) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {s}"))),
            }
        }
    }
}
