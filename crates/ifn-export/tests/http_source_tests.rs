//! Tests of the management API record source against a mock server
//!
//! The client is blocking, so every call runs on a blocking task.

use ifn_common::time::from_iso_time;
use ifn_export::source::{ManagementApiSource, PageQuery, RecordSource, SourceError, SurveyInfoSource};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn query(page_token: Option<&str>) -> PageQuery {
    PageQuery {
        study_key: "ifn".into(),
        survey_key: "weekly".into(),
        start: from_iso_time("2024-01-01T00:00:00").unwrap(),
        end: from_iso_time("2024-01-08T00:00:00").unwrap(),
        page_size: 2,
        page_token: page_token.map(String::from),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/data/ifn/survey/weekly/responses"))
        .and(header("authorization", "Bearer secret"))
        .and(query_param("from", "1704067200"))
        .and(query_param("until", "1704671999"))
        .and(query_param("page", "1"))
        .and(query_param("pageSize", "2"))
        .and(query_param("keySeparator", "|"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [
                {"ID": "a", "submitted": 1704100000, "version": "1-0", "weekly.Q1|1": "1"},
                {"ID": "b", "submitted": 1704200000, "version": "1-0"}
            ],
            "page": 1,
            "pageCount": 2
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/data/ifn/survey/weekly/responses"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [{"ID": "c", "submitted": 1704300000, "version": "1-1"}],
            "page": 2,
            "pageCount": 2
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let (first, second) = tokio::task::spawn_blocking(move || {
        let mut source = ManagementApiSource::new(uri, "secret", "|").unwrap();
        let first = source.fetch_page(&query(None)).unwrap().unwrap();
        let second = source
            .fetch_page(&query(first.next_page_token.as_deref()))
            .unwrap()
            .unwrap();
        (first, second)
    })
    .await
    .unwrap();

    assert_eq!(first.records.len(), 2);
    assert_eq!(first.records[0].id, "a");
    assert_eq!(first.records[0].version, "1-0");
    assert_eq!(first.next_page_token.as_deref(), Some("2"));
    assert_eq!(second.records[0].id, "c");
    assert!(second.next_page_token.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/data/ifn/survey/weekly/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [], "page": 1, "pageCount": 0
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let page = tokio::task::spawn_blocking(move || {
        ManagementApiSource::new(uri, "secret", "|")
            .unwrap()
            .fetch_page(&query(None))
            .unwrap()
    })
    .await
    .unwrap();
    assert!(page.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || {
        ManagementApiSource::new(uri, "expired", "|")
            .unwrap()
            .fetch_page(&query(None))
            .unwrap_err()
    })
    .await
    .unwrap();
    assert!(matches!(err, SourceError::Status { status: 401, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_survey_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/data/ifn/survey/intake/survey-info"))
        .and(query_param("lang", "fr"))
        .and(query_param("shortKeys", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "versions": [{"versionId": "1-0", "questions": []}]
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let versions = tokio::task::spawn_blocking(move || {
        ManagementApiSource::new(uri, "secret", "|")
            .unwrap()
            .survey_versions("ifn", "intake", "fr")
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["versionId"], "1-0");
}
