//! Shared fixtures for integration tests: scripted adapters, a fixed-plan
//! translator and a tiny HTTP responder standing in for the warehouse REST API.

use async_trait::async_trait;
use serde_json::json;
use skyroute::adapter::BackendAdapter;
use skyroute::coordinator::ExecutionPolicy;
use skyroute::error::{BackendError, TelemetryError, TranslationError};
use skyroute::outcome::{Column, ResultSet};
use skyroute::plan::QueryPlan;
use skyroute::telemetry::{TelemetryEvent, TelemetrySink};
use skyroute::translator::QueryTranslator;
use skyroute::types::QueryRequest;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One-row result with a single `count` column
pub fn count_result(count: i64) -> ResultSet {
    ResultSet::new(
        vec![Column::new("count", "INTEGER")],
        vec![vec![json!(count)]],
    )
}

/// Adapter that replays scripted results, then repeats the last one
pub struct ScriptedAdapter {
    engine: &'static str,
    script: Mutex<VecDeque<Result<ResultSet, BackendError>>>,
    last: Mutex<Option<Result<ResultSet, BackendError>>>,
    delay: Duration,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    pub fn new(engine: &'static str, script: Vec<Result<ResultSet, BackendError>>) -> Self {
        Self {
            engine,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ok(engine: &'static str, result: ResultSet) -> Self {
        Self::new(engine, vec![Ok(result)])
    }

    pub fn failing(engine: &'static str, error: BackendError) -> Self {
        Self::new(engine, vec![Err(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Share in-flight accounting with other adapters
    pub fn with_gauge(mut self, in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Self {
        self.in_flight = in_flight;
        self.peak = peak;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn next(&self) -> Result<ResultSet, BackendError> {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match script.pop_front() {
            Some(next) => {
                *last = Some(next.clone());
                next
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(BackendError::execution("script exhausted"))),
        }
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn engine(&self) -> &str {
        self.engine
    }

    async fn execute(
        &self,
        query: &str,
        _policy: &ExecutionPolicy,
    ) -> Result<ResultSet, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next()
    }
}

/// Translator that always returns the same plan
pub struct FixedTranslator {
    plan: QueryPlan,
    calls: AtomicUsize,
}

impl FixedTranslator {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            plan: QueryPlan::from_pairs(pairs.iter().copied()).unwrap(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            plan: QueryPlan::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryTranslator for FixedTranslator {
    async fn translate(&self, _request: &QueryRequest) -> Result<QueryPlan, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Sink that rejects every event
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl TelemetrySink for FailingSink {
    fn emit(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TelemetryError::SinkUnavailable("collector offline".to_string()))
    }
}

/// A request seen by [`MockHttpServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Serves scripted `(status, body)` responses in order, one per connection.
/// Once the script runs out every request gets a 500.
pub struct MockHttpServer {
    pub endpoint: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let mut responses: VecDeque<(u16, String)> = responses.into();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                recorded.lock().unwrap().push(request);
                let (status, body) = responses
                    .pop_front()
                    .unwrap_or((500, "{\"error\":{\"message\":\"unscripted\"}}".to_string()));
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { endpoint, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: BTreeMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}
