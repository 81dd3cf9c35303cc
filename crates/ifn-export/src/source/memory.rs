//! In-memory record source
//!
//! Serves a fixed list of records, paginated like the management API. Used
//! to replay responses dumped as JSON and in tests.

use super::{PageQuery, RawRecord, RecordSource, ResponsePage, SourceError, SurveyInfoSource};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<RawRecord>,
    survey_versions: Vec<JsonValue>,
    /// Number of `fetch_page` calls, for assertions
    pub calls: usize,
}

impl MemorySource {
    pub fn new(mut records: Vec<RawRecord>) -> Self {
        records.sort_by(|a, b| a.submitted.cmp(&b.submitted).then_with(|| a.id.cmp(&b.id)));
        Self {
            records,
            survey_versions: Vec::new(),
            calls: 0,
        }
    }

    /// Load flat response documents (a JSON array)
    pub fn from_documents(documents: Vec<JsonValue>) -> Result<Self, SourceError> {
        let records = documents
            .into_iter()
            .map(RawRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(records))
    }

    pub fn with_survey_versions(mut self, versions: Vec<JsonValue>) -> Self {
        self.survey_versions = versions;
        self
    }

    pub fn push(&mut self, record: RawRecord) {
        self.records.push(record);
        self.records
            .sort_by(|a, b| a.submitted.cmp(&b.submitted).then_with(|| a.id.cmp(&b.id)));
    }
}

impl RecordSource for MemorySource {
    fn fetch_page(&mut self, query: &PageQuery) -> Result<Option<ResponsePage>, SourceError> {
        self.calls += 1;
        let in_window: Vec<&RawRecord> = self
            .records
            .iter()
            .filter(|r| r.submitted >= query.start && r.submitted < query.end)
            .collect();
        if in_window.is_empty() {
            return Ok(None);
        }

        let offset = match &query.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SourceError::invalid_response(format!("bad page token '{}'", token)))?,
            None => 0,
        };
        let page_size = query.page_size.max(1);
        let records: Vec<RawRecord> = in_window
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|r| (*r).clone())
            .collect();
        let next = offset + records.len();
        let next_page_token = (next < in_window.len()).then(|| next.to_string());

        Ok(Some(ResponsePage {
            records,
            next_page_token,
        }))
    }
}

impl SurveyInfoSource for MemorySource {
    fn survey_versions(
        &mut self,
        _study_key: &str,
        _survey_key: &str,
        _lang: &str,
    ) -> Result<Vec<JsonValue>, SourceError> {
        Ok(self.survey_versions.clone())
    }
}
