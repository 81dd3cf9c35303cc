//! Management API record source
//!
//! Blocking client for the response export and survey-info endpoints of the
//! management API. Authentication is a static bearer token read from
//! `IFN_API_TOKEN`; it is never renewed.

use super::{PageQuery, RawRecord, RecordSource, ResponsePage, SourceError, SurveyInfoSource};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// API Client Constants
// ============================================================================

/// Default timeout for API requests in seconds.
/// Can be overridden via IFN_API_TIMEOUT_SECS environment variable.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

pub const API_URL_ENV: &str = "IFN_API_URL";
pub const API_TOKEN_ENV: &str = "IFN_API_TOKEN";

mod endpoints {
    pub fn responses_url(base: &str, study_key: &str, survey_key: &str) -> String {
        format!(
            "{}/v1/data/{}/survey/{}/responses",
            base.trim_end_matches('/'),
            study_key,
            survey_key
        )
    }

    pub fn survey_info_url(base: &str, study_key: &str, survey_key: &str) -> String {
        format!(
            "{}/v1/data/{}/survey/{}/survey-info",
            base.trim_end_matches('/'),
            study_key,
            survey_key
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsesPayload {
    #[serde(default)]
    responses: Vec<JsonValue>,
    #[serde(default)]
    page: u64,
    #[serde(default)]
    page_count: u64,
}

#[derive(Debug, Deserialize)]
struct SurveyInfoPayload {
    versions: Option<Vec<JsonValue>>,
}

/// Record source backed by the management API
pub struct ManagementApiSource {
    client: Client,
    base_url: String,
    token: String,
    key_separator: String,
}

impl ManagementApiSource {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        key_separator: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let timeout_secs = std::env::var("IFN_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            key_separator: key_separator.into(),
        })
    }

    /// Create from `IFN_API_URL` and `IFN_API_TOKEN`
    pub fn from_env(key_separator: impl Into<String>) -> Result<Self, SourceError> {
        let base_url = std::env::var(API_URL_ENV)
            .map_err(|_| SourceError::Config(format!("{} is not set", API_URL_ENV)))?;
        let token = std::env::var(API_TOKEN_ENV)
            .map_err(|_| SourceError::Config(format!("{} is not set", API_TOKEN_ENV)))?;
        Self::new(base_url, token, key_separator)
    }

    fn check_status(url: &str, response: Response) -> Result<Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl RecordSource for ManagementApiSource {
    fn fetch_page(&mut self, query: &PageQuery) -> Result<Option<ResponsePage>, SourceError> {
        let url = endpoints::responses_url(&self.base_url, &query.study_key, &query.survey_key);
        let page: u64 = match &query.page_token {
            Some(token) => token
                .parse()
                .map_err(|_| SourceError::invalid_response(format!("bad page token '{}'", token)))?,
            None => 1,
        };

        debug!(url = %url, page, start = %query.start, end = %query.end, "Fetching responses page");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("from", query.start.timestamp().to_string()),
                // the API bound is inclusive
                ("until", (query.end.timestamp() - 1).to_string()),
                ("page", page.to_string()),
                ("pageSize", query.page_size.to_string()),
                ("shortKeys", "true".to_string()),
                ("keySeparator", self.key_separator.clone()),
            ])
            .send()?;
        let payload: ResponsesPayload = Self::check_status(&url, response)?.json()?;

        if payload.responses.is_empty() {
            return Ok(None);
        }

        let records = payload
            .responses
            .into_iter()
            .map(RawRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        let current = payload.page.max(page);
        let next_page_token = (current < payload.page_count).then(|| (current + 1).to_string());

        Ok(Some(ResponsePage {
            records,
            next_page_token,
        }))
    }
}

impl SurveyInfoSource for ManagementApiSource {
    fn survey_versions(
        &mut self,
        study_key: &str,
        survey_key: &str,
        lang: &str,
    ) -> Result<Vec<JsonValue>, SourceError> {
        let url = endpoints::survey_info_url(&self.base_url, study_key, survey_key);
        debug!(url = %url, lang, "Fetching survey info");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("lang", lang), ("shortKeys", "true")])
            .send()?;
        let payload: SurveyInfoPayload = Self::check_status(&url, response)?.json()?;

        payload
            .versions
            .ok_or_else(|| SourceError::invalid_response("'versions' is missing in survey info"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(
            endpoints::responses_url("https://api.example.org/", "ifn", "weekly"),
            "https://api.example.org/v1/data/ifn/survey/weekly/responses"
        );
        assert_eq!(
            endpoints::survey_info_url("https://api.example.org", "ifn", "intake"),
            "https://api.example.org/v1/data/ifn/survey/intake/survey-info"
        );
    }

    #[test]
    fn test_payload_parsing() {
        let payload: ResponsesPayload = serde_json::from_str(
            r#"{"responses": [{"ID": "a", "submitted": 1, "version": "1"}], "page": 1, "pageCount": 3}"#,
        )
        .unwrap();
        assert_eq!(payload.page_count, 3);
        assert_eq!(payload.responses.len(), 1);
    }
}
