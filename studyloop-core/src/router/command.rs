//! Command input and per-action typed parameters
//!
//! A [`ManagerCommand`] arrives with a free-form `params` map. It is
//! checked here, once, into a [`ParsedCommand`] carrying a typed
//! [`Request`]; handlers never see the raw map.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StudyError};
use crate::policy::{Feedback, ModeId};

/// Actions the router understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Extract,
    Generate,
    UpdateRl,
    Recommend,
    Survey,
    ResetPreferences,
    EndSession,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Generate => "generate",
            Self::UpdateRl => "update_rl",
            Self::Recommend => "recommend",
            Self::Survey => "survey",
            Self::ResetPreferences => "reset_preferences",
            Self::EndSession => "end_session",
        }
    }

    pub fn all() -> &'static [Action] {
        &[
            Self::Extract,
            Self::Generate,
            Self::UpdateRl,
            Self::Recommend,
            Self::Survey,
            Self::ResetPreferences,
            Self::EndSession,
        ]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = StudyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| StudyError::UnknownAction(s.to_string()))
    }
}

/// One command as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerCommand {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// User whose policy state the command reads or writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ManagerCommand {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Validate the action and params into a typed command
    ///
    /// `session_id` and `user_id` found inside `params` are lifted onto
    /// the command when the command itself has none; the command's own
    /// values win otherwise.
    pub fn parse(self, default_user: &str) -> Result<ParsedCommand> {
        let action: Action = self.action.parse()?;
        let mut params = self.params;

        let params_session = take_string(&mut params, "session_id")?;
        let params_user = take_string(&mut params, "user_id")?;
        let session_id = self.session_id.or(params_session);
        let user_id = self
            .user_id
            .or(params_user)
            .unwrap_or_else(|| default_user.to_string());

        if user_id.trim().is_empty() {
            return Err(StudyError::Validation("user_id must not be empty".into()));
        }

        Ok(ParsedCommand {
            action,
            session_id,
            user_id,
            request: Request::parse(action, params)?,
        })
    }
}

fn take_string(params: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(StudyError::Validation(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// A validated command, ready for its handler
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub action: Action,
    pub session_id: Option<String>,
    pub user_id: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Extract(ExtractParams),
    Generate(GenerateParams),
    UpdateRl { mode: ModeId, feedback: Feedback },
    Recommend,
    Survey { preference: Option<ModeId> },
    ResetPreferences,
    EndSession,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    pub file_path: Option<PathBuf>,
    pub file_content: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateParams {
    pub mode: Option<ModeId>,
    pub count: Option<u32>,
    pub topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGenerateParams {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUpdateParams {
    mode: String,
    feedback: Feedback,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSurveyParams {
    #[serde(default, alias = "initial_preference")]
    preference: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

impl Request {
    fn parse(action: Action, params: Map<String, Value>) -> Result<Self> {
        let request = match action {
            Action::Extract => {
                let params: ExtractParams = decode(action, params)?;
                if params.file_path.is_none() && params.file_content.is_none() {
                    return Err(StudyError::Validation(
                        "extract requires file_path or file_content".into(),
                    ));
                }
                Self::Extract(params)
            }
            Action::Generate => {
                let raw: RawGenerateParams = decode(action, params)?;
                Self::Generate(GenerateParams {
                    mode: raw.mode.as_deref().map(ModeId::from_str).transpose()?,
                    count: raw.count,
                    topic: raw.topic,
                })
            }
            Action::UpdateRl => {
                let raw: RawUpdateParams = decode(action, params)?;
                let feedback = raw.feedback;
                feedback.reward()?;
                Self::UpdateRl {
                    mode: ModeId::from_str(&raw.mode)?,
                    feedback,
                }
            }
            Action::Recommend => {
                decode::<NoParams>(action, params)?;
                Self::Recommend
            }
            Action::Survey => {
                let raw: RawSurveyParams = decode(action, params)?;
                let preference = match raw.preference.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(p) => Some(ModeId::from_str(p)?),
                };
                Self::Survey { preference }
            }
            Action::ResetPreferences => {
                decode::<NoParams>(action, params)?;
                Self::ResetPreferences
            }
            Action::EndSession => {
                decode::<NoParams>(action, params)?;
                Self::EndSession
            }
        };
        Ok(request)
    }
}

fn decode<T: DeserializeOwned>(action: Action, params: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| StudyError::Validation(format!("{action}: {e}")))
}
