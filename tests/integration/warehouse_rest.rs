//! Warehouse adapter against a local stand-in for the REST API

use crate::integration::support::{count_result, MockHttpServer, ScriptedAdapter};
use serde_json::json;
use skyroute::adapter::{BackendAdapter, WarehouseAdapter, WarehouseSettings};
use skyroute::agent::QueryAgent;
use skyroute::coordinator::{ExecutionPolicy, RetryPolicy};
use skyroute::credentials::Secret;
use skyroute::error::BackendErrorKind;
use skyroute::outcome::OverallStatus;
use skyroute::telemetry::ServiceConfig;
use skyroute::types::{BackendId, QueryRequest};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = r#"{"fields": [
    {"name": "region", "type": "STRING"},
    {"name": "orders", "type": "INTEGER"}
]}"#;

fn adapter(server: &MockHttpServer) -> WarehouseAdapter {
    let mut settings = WarehouseSettings::new("analytics").with_endpoint(server.endpoint.clone());
    settings.poll_interval_ms = 5;
    WarehouseAdapter::new(settings, Secret::new("ya29.test-token")).unwrap()
}

#[tokio::test]
async fn polls_running_job_and_follows_page_tokens() {
    let server = MockHttpServer::start(vec![
        (
            200,
            json!({
                "jobComplete": false,
                "jobReference": {"projectId": "analytics", "jobId": "job_42", "location": "EU"}
            })
            .to_string(),
        ),
        (
            200,
            format!(
                r#"{{"jobComplete": true, "totalRows": "3", "schema": {}, "pageToken": "p2",
                    "rows": [{{"f": [{{"v": "emea"}}, {{"v": "10"}}]}}, {{"f": [{{"v": "apac"}}, {{"v": "7"}}]}}]}}"#,
                SCHEMA
            ),
        ),
        (
            200,
            format!(
                r#"{{"jobComplete": true, "totalRows": "3", "schema": {},
                    "rows": [{{"f": [{{"v": "amer"}}, {{"v": null}}]}}]}}"#,
                SCHEMA
            ),
        ),
    ])
    .await;

    let result = adapter(&server)
        .execute("SELECT region, COUNT(*) FROM orders GROUP BY 1", &ExecutionPolicy::default())
        .await
        .unwrap();

    assert_eq!(result.columns[1].name, "orders");
    assert_eq!(result.columns[1].data_type, "INTEGER");
    assert_eq!(
        result.rows,
        vec![
            vec![json!("emea"), json!(10)],
            vec![json!("apac"), json!(7)],
            vec![json!("amer"), serde_json::Value::Null],
        ]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/projects/analytics/queries");
    assert_eq!(requests[0].header("Authorization"), Some("Bearer ya29.test-token"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["useLegacySql"], json!(false));
    assert!(body["query"].as_str().unwrap().starts_with("SELECT region"));

    assert_eq!(requests[1].method, "GET");
    assert!(requests[1].path.starts_with("/projects/analytics/queries/job_42?"));
    assert!(requests[1].path.contains("location=EU"));
    assert!(requests[2].path.contains("pageToken=p2"));
}

#[tokio::test]
async fn total_rows_over_the_cap_is_too_large() {
    let server = MockHttpServer::start(vec![(
        200,
        format!(
            r#"{{"jobComplete": true, "totalRows": "5000", "schema": {}, "rows": []}}"#,
            SCHEMA
        ),
    )])
    .await;

    let settings = WarehouseSettings::new("analytics")
        .with_endpoint(server.endpoint.clone())
        .with_location("EU");
    let adapter = WarehouseAdapter::new(settings, Secret::new("ya29.test-token")).unwrap();
    let mut policy = ExecutionPolicy::default();
    policy.limits.max_rows = 100;
    let err = adapter
        .execute("SELECT * FROM orders", &policy)
        .await
        .unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::ResultTooLarge);

    let body: serde_json::Value = serde_json::from_str(&server.requests()[0].body).unwrap();
    assert_eq!(body["location"], json!("EU"));
    assert_eq!(body["maxResults"], json!(101));
}

#[tokio::test]
async fn invalid_query_is_a_syntax_failure_in_a_partial_result() {
    let server = MockHttpServer::start(vec![(
        400,
        json!({
            "error": {
                "code": 400,
                "message": "Syntax error: Expected end of input but got keyword FORM at [1:17]",
                "errors": [{"reason": "invalidQuery", "message": "Syntax error"}]
            }
        })
        .to_string(),
    )])
    .await;

    let agent = QueryAgent::builder(ServiceConfig::default())
        .adapter("relational", Arc::new(ScriptedAdapter::ok("postgres", count_result(12))))
        .adapter("warehouse", Arc::new(adapter(&server)))
        .policy(ExecutionPolicy {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
                jitter: 0.0,
            },
            ..ExecutionPolicy::default()
        })
        .build()
        .unwrap();

    let result = agent
        .execute_query(QueryRequest::new("SELECT COUNT(*) FORM orders"))
        .await
        .unwrap();

    assert_eq!(result.status(), OverallStatus::Partial);
    let warehouse = result.outcome(&BackendId::new("warehouse")).unwrap();
    assert_eq!(warehouse.engine(), "bigquery");
    assert_eq!(warehouse.error_kind(), Some(BackendErrorKind::QuerySyntax));
    assert!(warehouse.error().unwrap().message.contains("FORM"));
    assert_eq!(warehouse.retries(), 0);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn server_errors_are_retried_as_connection_failures() {
    let server = MockHttpServer::start(vec![
        (503, "upstream unavailable".to_string()),
        (
            200,
            format!(
                r#"{{"jobComplete": true, "totalRows": "1", "schema": {}, "rows": [{{"f": [{{"v": "emea"}}, {{"v": "1"}}]}}]}}"#,
                SCHEMA
            ),
        ),
    ])
    .await;

    let agent = QueryAgent::builder(ServiceConfig::default())
        .adapter("warehouse", Arc::new(adapter(&server)))
        .policy(ExecutionPolicy {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
                jitter: 0.0,
            },
            ..ExecutionPolicy::default()
        })
        .build()
        .unwrap();

    let result = agent.execute_query(QueryRequest::new("SELECT 1")).await.unwrap();
    assert_eq!(result.status(), OverallStatus::Success);
    assert_eq!(result.outcomes()[0].retries(), 1);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn wide_first_page_stops_before_the_next_page() {
    let wide = "x".repeat(4096);
    let server = MockHttpServer::start(vec![
        (
            200,
            json!({
                "jobComplete": true,
                "jobReference": {"projectId": "analytics", "jobId": "job_7"},
                "totalRows": "2",
                "schema": {"fields": [{"name": "payload", "type": "STRING"}]},
                "pageToken": "p2",
                "rows": [{"f": [{"v": wide}]}]
            })
            .to_string(),
        ),
        (
            200,
            json!({
                "jobComplete": true,
                "schema": {"fields": [{"name": "payload", "type": "STRING"}]},
                "rows": [{"f": [{"v": "tail"}]}]
            })
            .to_string(),
        ),
    ])
    .await;

    let mut policy = ExecutionPolicy::default();
    policy.limits.max_bytes = 1024;
    let err = adapter(&server)
        .execute("SELECT payload FROM events", &policy)
        .await
        .unwrap_err();

    assert_eq!(err.kind, BackendErrorKind::ResultTooLarge);
    assert!(err.message.contains("cap of 1024"));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn page_token_without_job_reference_is_an_error() {
    let server = MockHttpServer::start(vec![(
        200,
        format!(
            r#"{{"jobComplete": true, "totalRows": "4", "schema": {}, "pageToken": "p2",
                "rows": [{{"f": [{{"v": "emea"}}, {{"v": "10"}}]}}]}}"#,
            SCHEMA
        ),
    )])
    .await;

    let err = adapter(&server)
        .execute("SELECT region, orders FROM totals", &ExecutionPolicy::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind, BackendErrorKind::Execution);
    assert!(err.message.contains("without a job reference"));
    assert_eq!(server.requests().len(), 1);
}
