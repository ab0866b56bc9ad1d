//! Fan-out behaviour: concurrency, ordering, timeouts and cancellation

use crate::integration::support::{count_result, ScriptedAdapter};
use skyroute::agent::QueryAgent;
use skyroute::error::BackendErrorKind;
use skyroute::outcome::{OutcomeStatus, OverallStatus};
use skyroute::telemetry::ServiceConfig;
use skyroute::types::{ExecutionOptions, QueryRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn backends_run_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut builder = QueryAgent::builder(ServiceConfig::default());
    for (id, engine) in [("relational", "postgres"), ("warehouse", "bigquery"), ("replica", "postgres")] {
        let adapter = ScriptedAdapter::ok(engine, count_result(1))
            .with_delay(Duration::from_millis(100))
            .with_gauge(in_flight.clone(), peak.clone());
        builder = builder.adapter(id, Arc::new(adapter));
    }
    let agent = builder.build().unwrap();

    let started = Instant::now();
    let result = agent.execute_query(QueryRequest::new("SELECT 1")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status(), OverallStatus::Success);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert!(elapsed < Duration::from_millis(150), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn outcomes_follow_plan_order_not_completion_order() {
    let delays = [400u64, 10, 250, 0, 90];
    let mut builder = QueryAgent::builder(ServiceConfig::default());
    for (i, delay) in delays.iter().enumerate() {
        let adapter = ScriptedAdapter::ok("postgres", count_result(i as i64))
            .with_delay(Duration::from_millis(*delay));
        builder = builder.adapter(format!("backend-{}", i), Arc::new(adapter));
    }
    let agent = builder.build().unwrap();

    let result = agent.execute_query(QueryRequest::new("SELECT 1")).await.unwrap();
    let order: Vec<_> = result
        .outcomes()
        .iter()
        .map(|o| o.backend().to_string())
        .collect();
    assert_eq!(
        order,
        vec!["backend-0", "backend-1", "backend-2", "backend-3", "backend-4"]
    );
    for (i, outcome) in result.outcomes().iter().enumerate() {
        assert_eq!(outcome.payload().unwrap().rows[0][0], serde_json::json!(i));
    }
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out_without_delaying_the_other() {
    let agent = QueryAgent::builder(ServiceConfig::default())
        .adapter(
            "relational",
            Arc::new(ScriptedAdapter::ok("postgres", count_result(1))),
        )
        .adapter(
            "warehouse",
            Arc::new(
                ScriptedAdapter::ok("bigquery", count_result(1)).with_delay(Duration::from_secs(60)),
            ),
        )
        .build()
        .unwrap();

    let request = QueryRequest::new("SELECT 1")
        .with_options(ExecutionOptions::default().with_timeout(Duration::from_secs(2)));
    let started = Instant::now();
    let result = agent.execute_query(request).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.status(), OverallStatus::Partial);
    assert_eq!(result.outcomes()[0].status(), OutcomeStatus::Success);
    assert_eq!(result.outcomes()[1].status(), OutcomeStatus::Timeout);
    assert_eq!(
        result.outcomes()[1].error_kind(),
        Some(BackendErrorKind::ExecutionTimeout)
    );
    assert_eq!(agent.metrics().backend("warehouse").timeout, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_reports_in_flight_backends_as_cancelled() {
    let agent = QueryAgent::builder(ServiceConfig::default())
        .adapter(
            "relational",
            Arc::new(
                ScriptedAdapter::ok("postgres", count_result(1)).with_delay(Duration::from_secs(10)),
            ),
        )
        .adapter(
            "warehouse",
            Arc::new(
                ScriptedAdapter::ok("bigquery", count_result(1)).with_delay(Duration::from_secs(10)),
            ),
        )
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = agent
        .execute_query_with_cancel(QueryRequest::new("SELECT 1"), &cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.status(), OverallStatus::Failure);
    for outcome in result.outcomes() {
        assert_eq!(outcome.error_kind(), Some(BackendErrorKind::Cancelled));
    }
}

#[tokio::test]
async fn concurrent_requests_share_one_agent() {
    let adapter = Arc::new(ScriptedAdapter::ok("postgres", count_result(1)));
    let agent = Arc::new(
        QueryAgent::builder(ServiceConfig::default())
            .adapter("relational", adapter.clone())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let agent = agent.clone();
            tokio::spawn(async move {
                agent
                    .execute_query(QueryRequest::new(format!("SELECT {}", i)))
                    .await
            })
        })
        .collect();

    let mut trace_ids = std::collections::HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status(), OverallStatus::Success);
        trace_ids.insert(result.trace_id().to_string());
    }
    assert_eq!(trace_ids.len(), 8);
    assert_eq!(adapter.calls(), 8);
    assert_eq!(agent.metrics().requests_total, 8);
}
