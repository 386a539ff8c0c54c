//! External collaborators: content extraction and study material generation
//!
//! Both are traits so the router can be wired to real services or to
//! test doubles. A collaborator reports its own failures in the response
//! (`success: false` plus `error`); the router turns those into
//! collaborator errors in the envelope.

mod http;
mod text;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::ModeId;

pub use http::HttpGenerator;
pub use text::TextExtractor;

/// What to extract content from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Inline document text, used instead of reading `file_path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    /// Type hint such as `txt`, `md` or `pdf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub success: bool,
    #[serde(default)]
    pub chunks: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExtractionResponse {
    pub fn ok(chunks: Vec<String>, summary: Option<String>) -> Self {
        Self {
            success: true,
            chunks,
            summary,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            chunks: Vec::new(),
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// Input to the generation service, built from stored session content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub chunks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerationResponse {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Turns a document reference into ordered text chunks and a summary
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: ExtractionRequest) -> ExtractionResponse;
}

/// Produces study material from extracted chunks
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> GenerationResponse;
}

/// Generator used when no generation service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl Generator for UnavailableGenerator {
    async fn generate(&self, _request: GenerationRequest) -> GenerationResponse {
        GenerationResponse::failed("No generation service configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_response_parses_minimal_body() {
        let response: GenerationResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(response.success);
        assert!(response.payload.is_null());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_generation_request_omits_unset_fields() {
        let request = GenerationRequest {
            session_id: "s1".into(),
            mode: Some(ModeId::Quiz),
            count: None,
            topic: None,
            chunks: vec!["a".into()],
            summary: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["mode"], "quiz");
        assert!(json.get("count").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_generator_fails() {
        let request = GenerationRequest {
            session_id: "s1".into(),
            mode: None,
            count: None,
            topic: None,
            chunks: Vec::new(),
            summary: None,
        };
        let response = UnavailableGenerator.generate(request).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("No generation service"));
    }
}
