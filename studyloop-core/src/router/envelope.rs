//! Uniform command result
//!
//! Every action answers with an [`Envelope`]: `success`, `error`,
//! `error_kind`, and the action's payload fields flattened alongside.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorKind, StudyError};
use crate::policy::{ModeId, PolicyState, Recommendation, iso8601};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub payload: Option<Payload>,
}

impl Envelope {
    pub fn ok(payload: impl Into<Payload>) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            payload: Some(payload.into()),
        }
    }

    pub fn failure(err: &StudyError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            payload: None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("Failed to encode envelope: {e}"),
                "error_kind": ErrorKind::Internal,
            })
        })
    }
}

/// Action-specific result fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Extract(ExtractPayload),
    Generate(GeneratePayload),
    PolicyUpdate(PolicyUpdate),
    Recommendation(Recommendation),
    Survey(SurveyPayload),
    PolicySummary(PolicySummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractPayload {
    pub chunks: Vec<String>,
    pub summary: Option<String>,
    /// Session the chunks were stored under; unset when they were not kept
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratePayload {
    pub payload: Value,
}

/// Posterior of the mode that just received feedback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyUpdate {
    pub mode: ModeId,
    pub mode_success: f64,
    pub mode_failure: f64,
    pub history_len: usize,
    #[serde(with = "iso8601::option")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl PolicyUpdate {
    pub fn new(state: &PolicyState, mode: ModeId) -> Self {
        Self {
            mode,
            mode_success: state.success(mode),
            mode_failure: state.failure(mode),
            history_len: state.history.len(),
            last_updated: state.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyPayload {
    pub preference: Option<ModeId>,
}

/// Whole-state counters returned after a reset or session end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub mode_success: BTreeMap<ModeId, f64>,
    pub mode_failure: BTreeMap<ModeId, f64>,
    pub total_sessions: u64,
    pub survey_completed: bool,
}

impl From<&PolicyState> for PolicySummary {
    fn from(state: &PolicyState) -> Self {
        Self {
            mode_success: state.mode_success.clone(),
            mode_failure: state.mode_failure.clone(),
            total_sessions: state.total_sessions,
            survey_completed: state.survey_completed,
        }
    }
}

impl From<ExtractPayload> for Payload {
    fn from(p: ExtractPayload) -> Self {
        Self::Extract(p)
    }
}

impl From<GeneratePayload> for Payload {
    fn from(p: GeneratePayload) -> Self {
        Self::Generate(p)
    }
}

impl From<PolicyUpdate> for Payload {
    fn from(p: PolicyUpdate) -> Self {
        Self::PolicyUpdate(p)
    }
}

impl From<Recommendation> for Payload {
    fn from(p: Recommendation) -> Self {
        Self::Recommendation(p)
    }
}

impl From<SurveyPayload> for Payload {
    fn from(p: SurveyPayload) -> Self {
        Self::Survey(p)
    }
}

impl From<PolicySummary> for Payload {
    fn from(p: PolicySummary) -> Self {
        Self::PolicySummary(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RecommendationSource;
    use serde_json::json;

    #[test]
    fn test_success_envelope_flattens_payload() {
        let envelope = Envelope::ok(Recommendation {
            mode: ModeId::Flashcard,
            source: RecommendationSource::ColdStart,
        });
        assert_eq!(
            envelope.to_json(),
            json!({
                "success": true,
                "error": null,
                "error_kind": null,
                "mode": "flashcard",
                "source": "cold_start",
            })
        );
    }

    #[test]
    fn test_failure_envelope_has_kind_and_no_payload() {
        let envelope = Envelope::failure(&StudyError::SessionNotFound("s2".into()));
        assert_eq!(
            envelope.to_json(),
            json!({
                "success": false,
                "error": "Session not found: s2",
                "error_kind": "session_not_found",
            })
        );
    }

    #[test]
    fn test_policy_summary_uses_mode_names() {
        let summary = PolicySummary::from(&PolicyState::new());
        let json = Envelope::ok(summary).to_json();
        assert_eq!(json["mode_success"]["quiz"], 1.0);
        assert_eq!(json["mode_failure"]["interactive"], 1.0);
        assert_eq!(json["total_sessions"], 0);
        assert_eq!(json["survey_completed"], false);
    }

    #[test]
    fn test_policy_update_fields() {
        let state = PolicyState::new();
        let json = Envelope::ok(PolicyUpdate::new(&state, ModeId::Quiz)).to_json();
        assert_eq!(json["mode"], "quiz");
        assert_eq!(json["history_len"], 0);
        assert!(json["last_updated"].is_null());
    }
}
