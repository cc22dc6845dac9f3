// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day(y: i32, m: u32, d: u32) -> FetchPeriod {
    FetchPeriod::Day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn test_fetch_config(base_url: &str) -> FetchConfig {
    FetchConfig {
        elia_base_url: base_url.to_string(),
        page_limit: 2,
        ..FetchConfig::default()
    }
}

/// Source answering from a script, one entry per call
struct ScriptedSource {
    script: Mutex<VecDeque<std::result::Result<Vec<u8>, SourceError>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn new(script: Vec<std::result::Result<Vec<u8>, SourceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for ScriptedSource {
    async fn fetch_payload(
        &self,
        _source: SourceType,
        _period: FetchPeriod,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(b"[]".to_vec()))
    }
}

fn status(code: u16) -> SourceError {
    SourceError::Status {
        status: code,
        url: "https://opendata.example/records".to_string(),
    }
}

fn solar_payload() -> Vec<u8> {
    serde_json::to_vec(&json!([
        {"datetime": "2024-02-01T00:00:00+00:00", "measured": 0.0},
        {"datetime": "2024-02-01T00:15:00+00:00", "measured": 0.1}
    ]))
    .unwrap()
}

// Fetcher classification

#[tokio::test]
async fn transient_failures_below_the_bound_succeed() {
    let source = ScriptedSource::new(vec![
        Err(status(503)),
        Err(SourceError::Timeout("10s".to_string())),
        Ok(solar_payload()),
    ]);
    let fetcher = Fetcher::new(source.clone(), RetryConfig::immediate(3));

    let batch = fetcher.fetch(SourceType::Solar, day(2024, 2, 1)).await.unwrap();

    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.payload, solar_payload());
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_report_attempts_and_last_cause() {
    let source = ScriptedSource::new(vec![Err(status(500)), Err(status(502)), Err(status(503))]);
    let fetcher = Fetcher::new(source.clone(), RetryConfig::immediate(3));

    let err = fetcher.fetch(SourceType::Wind, day(2024, 2, 1)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Exhausted);
    assert_eq!(err.attempts, 3);
    assert_eq!(err.cause, status(503));
    assert_eq!(err.source_type, SourceType::Wind);
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let source = ScriptedSource::new(vec![Err(status(404))]);
    let fetcher = Fetcher::new(source.clone(), RetryConfig::immediate(3));

    let err = fetcher.fetch(SourceType::Solar, day(2024, 2, 1)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Permanent);
    assert_eq!(err.attempts, 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn undecodable_payload_is_permanent() {
    let source = ScriptedSource::new(vec![Ok(b"<html>busy</html>".to_vec())]);
    let fetcher = Fetcher::new(source.clone(), RetryConfig::immediate(3));

    let err = fetcher.fetch(SourceType::Solar, day(2024, 2, 1)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Permanent);
    assert!(matches!(err.cause, SourceError::Decode(_)));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn empty_payload_is_an_empty_batch() {
    let source = ScriptedSource::new(vec![Ok(Vec::new())]);
    let fetcher = Fetcher::new(source, RetryConfig::immediate(3));

    let batch = fetcher.fetch(SourceType::Price, FetchPeriod::Month { year: 2024, month: 2 }).await.unwrap();
    assert!(batch.is_empty());
}

// HTTP sources

#[tokio::test]
async fn elia_day_is_paged_until_an_empty_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ods032/records"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .and(query_param("order_by", "datetime"))
        .and(query_param("refine", "datetime:\"2024-02-01\""))
        .and(query_param("refine", "region:\"Belgium\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "results": [
                {"datetime": "2024-02-01T00:00:00+00:00", "measured": 0.0, "region": "Belgium"},
                {"datetime": "2024-02-01T00:15:00+00:00", "measured": 0.0, "region": "Belgium"}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ods032/records"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "results": [
                {"datetime": "2024-02-01T00:30:00+00:00", "measured": 1.5, "region": "Belgium"}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ods032/records"))
        .and(query_param("offset", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "results": []
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = EliaClient::new(&test_fetch_config(&mock_server.uri())).unwrap();
    let payload = client
        .fetch_day(SourceType::Solar, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        .await
        .unwrap();

    let records = parse_payload(SourceType::Solar, &payload).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].timestamp, "2024-02-01T00:30:00+00:00");
    assert_eq!(records[2].value, Some(1.5));
}

#[tokio::test]
async fn wind_requests_have_no_region_refine_by_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ods031/records"))
        .and(query_param("refine", "region:\"Belgium\""))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ods031/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&mock_server)
        .await;

    let client = EliaClient::new(&test_fetch_config(&mock_server.uri())).unwrap();
    let payload = client
        .fetch_day(SourceType::Wind, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        .await
        .unwrap();

    assert!(parse_payload(SourceType::Wind, &payload).unwrap().is_empty());
}

#[tokio::test]
async fn http_server_errors_exhaust_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ods032/records"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = test_fetch_config(&mock_server.uri());
    let source = HttpRecordSource::from_config(&config).unwrap();
    let fetcher = Fetcher::new(Arc::new(source), RetryConfig::immediate(3));

    let err = fetcher.fetch(SourceType::Solar, day(2024, 2, 1)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Exhausted);
    assert_eq!(err.attempts, 3);
    assert!(matches!(err.cause, SourceError::Status { status: 503, .. }));
}

#[tokio::test]
async fn http_not_found_fails_permanently() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ods031/records"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_fetch_config(&mock_server.uri());
    let source = HttpRecordSource::from_config(&config).unwrap();
    let fetcher = Fetcher::new(Arc::new(source), RetryConfig::immediate(3));

    let err = fetcher.fetch(SourceType::Wind, day(2024, 2, 1)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Permanent);
    assert_eq!(err.attempts, 1);
}

#[tokio::test]
async fn price_export_is_fetched_per_month() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/export.csv"))
        .and(query_param("from", "01/02/2024"))
        .and(query_param("until", "01/03/2024"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"Date;Euro\r\n01/02/2024 00:00:00;\x80 87,35\r\n".to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_fetch_config(&mock_server.uri());
    config.price_export_url = Some(format!(
        "{}/export.csv?from={{from}}&until={{until}}",
        mock_server.uri()
    ));
    let source = HttpRecordSource::from_config(&config).unwrap();
    let fetcher = Fetcher::new(Arc::new(source), RetryConfig::immediate(3));

    let batch = fetcher
        .fetch(SourceType::Price, FetchPeriod::Month { year: 2024, month: 2 })
        .await
        .unwrap();

    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].value, Some(87.35));
}

#[tokio::test]
async fn missing_price_export_fails_without_retrying() {
    let source = HttpRecordSource::from_config(&FetchConfig::default()).unwrap();
    let fetcher = Fetcher::new(Arc::new(source), RetryConfig::immediate(3));

    let err = fetcher
        .fetch(SourceType::Price, FetchPeriod::Month { year: 2024, month: 2 })
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Permanent);
    assert_eq!(err.attempts, 1);
}
