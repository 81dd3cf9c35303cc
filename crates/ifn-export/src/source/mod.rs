//! Record sources
//!
//! The exporter pulls survey responses through [`RecordSource`], one page at
//! a time, and survey definitions through [`SurveyInfoSource`]. The binary
//! uses the management API ([`http::ManagementApiSource`]); tests and local
//! replays use [`memory::MemorySource`].

pub mod http;
pub mod memory;

pub use http::ManagementApiSource;
pub use memory::MemorySource;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Record source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network request failed: {0}. Check your internet connection and the API URL.")]
    Http(#[from] reqwest::Error),

    #[error("Request to '{url}' failed with status {status}. Check the API token and the study/survey keys.")]
    Status { url: String, status: u16 },

    #[error("Invalid response record: {0}")]
    InvalidRecord(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Source configuration error: {0}. Set IFN_API_URL and IFN_API_TOKEN in the environment or .env file.")]
    Config(String),
}

impl SourceError {
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

/// One survey response as fetched from the source
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub submitted: DateTime<Utc>,
    pub version: String,
    pub payload: JsonValue,
}

impl RawRecord {
    /// Build a record from a flat response document (`ID`, `submitted`,
    /// `version` fields plus the responses)
    pub fn from_document(payload: JsonValue) -> Result<Self, SourceError> {
        let object = payload
            .as_object()
            .ok_or_else(|| SourceError::invalid_record("response is not an object"))?;

        let id = match object.get("ID") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => return Err(SourceError::invalid_record("missing 'ID'")),
        };
        let submitted = object
            .get("submitted")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| SourceError::invalid_record(format!("response {}: missing 'submitted'", id)))?;
        let submitted = ifn_common::time::from_epoch(submitted)
            .map_err(|e| SourceError::invalid_record(format!("response {}: {}", id, e)))?;
        let version = object
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            id,
            submitted,
            version,
            payload,
        })
    }
}

/// Query for one page of responses in `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub study_key: String,
    pub survey_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub page_size: usize,
    /// Token returned with the previous page, `None` for the first one
    pub page_token: Option<String>,
}

/// A page of responses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponsePage {
    pub records: Vec<RawRecord>,
    pub next_page_token: Option<String>,
}

/// Paginated source of survey responses
pub trait RecordSource {
    /// Fetch one page. `Ok(None)` means the source has nothing for the query.
    fn fetch_page(&mut self, query: &PageQuery) -> Result<Option<ResponsePage>, SourceError>;
}

/// Source of survey definitions, one JSON document per version
pub trait SurveyInfoSource {
    fn survey_versions(
        &mut self,
        study_key: &str,
        survey_key: &str,
        lang: &str,
    ) -> Result<Vec<JsonValue>, SourceError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_document() {
        let record = RawRecord::from_document(json!({
            "ID": "r1", "submitted": 1704067200, "version": "1-0", "Q1": "a"
        }))
        .unwrap();
        assert_eq!(record.id, "r1");
        assert_eq!(record.version, "1-0");
        assert_eq!(record.submitted.timestamp(), 1704067200);
    }

    #[test]
    fn test_record_from_document_errors() {
        assert!(RawRecord::from_document(json!([1])).is_err());
        assert!(RawRecord::from_document(json!({"submitted": 1})).is_err());
        assert!(RawRecord::from_document(json!({"ID": "x"})).is_err());
    }
}
