//! Warehouse backend over the BigQuery v2 REST API.
//!
//! A query is submitted with `jobs.query`; when the job does not finish inside the
//! request window the adapter polls `getQueryResults`, then follows `pageToken`
//! until every row is read or a row or byte cap is hit. Concurrency against the API is
//! bounded by the adapter's own semaphore, the warehouse analogue of a pool.

use crate::adapter::BackendAdapter;
use crate::coordinator::ExecutionPolicy;
use crate::credentials::Secret;
use crate::error::{BackendError, BackendErrorKind};
use crate::outcome::{approximate_row_bytes, Column, ResultSet};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

pub const ENGINE: &str = "bigquery";
pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Connection settings for one warehouse backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSettings {
    /// Project that owns (and is billed for) the query jobs
    pub project: String,

    /// Dataset location, e.g. `US` or `europe-west1`
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum in-flight API calls for this adapter
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Rows requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pause between `getQueryResults` polls while the job is running
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_concurrent() -> usize {
    8
}

fn default_page_size() -> u32 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl WarehouseSettings {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: None,
            endpoint: default_endpoint(),
            max_concurrent: default_max_concurrent(),
            page_size: default_page_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    fn base_url(&self) -> String {
        format!(
            "{}/projects/{}/queries",
            self.endpoint.trim_end_matches('/'),
            self.project
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default = "job_complete_default")]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    total_rows: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
}

fn job_complete_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
}

pub struct WarehouseAdapter {
    http: reqwest::Client,
    settings: WarehouseSettings,
    token: Secret,
    permits: Semaphore,
}

impl WarehouseAdapter {
    pub fn new(settings: WarehouseSettings, token: Secret) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Ok(Self {
            http,
            settings,
            token,
            permits,
        })
    }

    pub fn settings(&self) -> &WarehouseSettings {
        &self.settings
    }

    async fn run(&self, query: &str, policy: &ExecutionPolicy) -> Result<ResultSet, BackendError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BackendError::connection("warehouse adapter is shut down"))?;

        let max_rows = policy.limits.max_rows;
        let page_size = self.page_size(max_rows);
        let body = QueryBody {
            query,
            use_legacy_sql: false,
            max_results: page_size,
            timeout_ms: policy.timeout.as_millis() as u64,
            location: self.settings.location.as_deref(),
        };
        let mut page = self
            .send(self.http.post(self.settings.base_url()).json(&body))
            .await?;
        let job = page.job_reference.clone().unwrap_or_default();

        while !page.job_complete {
            if job.job_id.is_empty() {
                return Err(BackendError::execution(
                    "warehouse job is still running but has no job reference",
                ));
            }
            debug!(engine = ENGINE, job_id = %job.job_id, "Waiting for warehouse job");
            tokio::time::sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;
            page = self.fetch_results(&job, page_size, None).await?;
        }

        if let Some(total) = page.total_rows.as_deref().and_then(|t| t.parse::<usize>().ok()) {
            if total > max_rows {
                return Err(too_many_rows(max_rows));
            }
        }

        let schema = page.schema.take().unwrap_or_default();
        let columns = schema
            .fields
            .iter()
            .map(|field| Column::new(field.name.clone(), field.field_type.clone()))
            .collect();
        let mut rows = Vec::new();
        let mut bytes = 0usize;
        loop {
            for row in page.rows.drain(..) {
                if rows.len() >= max_rows {
                    return Err(too_many_rows(max_rows));
                }
                let decoded = decode_row(&schema.fields, &row);
                bytes = bytes.saturating_add(approximate_row_bytes(&decoded));
                policy.limits.check_bytes(bytes)?;
                rows.push(decoded);
            }
            let Some(token) = page.page_token.take() else {
                break;
            };
            if job.job_id.is_empty() {
                return Err(BackendError::execution(
                    "paginated result without a job reference",
                ));
            }
            page = self.fetch_results(&job, page_size, Some(&token)).await?;
        }

        let result = ResultSet::new(columns, rows);
        policy.limits.check(&result)?;
        Ok(result)
    }

    fn page_size(&self, max_rows: usize) -> u32 {
        let cap = u32::try_from(max_rows.saturating_add(1)).unwrap_or(u32::MAX);
        self.settings.page_size.min(cap).max(1)
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<QueryPage, BackendError> {
        let url = format!("{}/{}", self.settings.base_url(), job.job_id);
        let mut params = vec![("maxResults", page_size.to_string())];
        if let Some(location) = job.location.as_ref().or(self.settings.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.http.get(url).query(&params)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<QueryPage, BackendError> {
        let response = request
            .bearer_auth(self.token.expose())
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            BackendError::execution(format!("unreadable warehouse response: {}", e))
        })
    }
}

#[async_trait]
impl BackendAdapter for WarehouseAdapter {
    fn engine(&self) -> &str {
        ENGINE
    }

    async fn execute(
        &self,
        query: &str,
        policy: &ExecutionPolicy,
    ) -> Result<ResultSet, BackendError> {
        debug!(engine = ENGINE, project = %self.settings.project, "Submitting warehouse query");
        match tokio::time::timeout(policy.timeout, self.run(query, policy)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(format!(
                "warehouse job did not finish within {} ms",
                policy.timeout.as_millis()
            ))),
        }
    }
}

fn too_many_rows(max_rows: usize) -> BackendError {
    BackendError::too_large(format!("result exceeds {} rows", max_rows))
}

/// Map a BigQuery error `reason` onto the error taxonomy, when it is decisive.
pub fn classify_reason(reason: &str) -> Option<BackendErrorKind> {
    match reason {
        "invalidQuery" | "notFound" => Some(BackendErrorKind::QuerySyntax),
        "responseTooLarge" => Some(BackendErrorKind::ResultTooLarge),
        "timeout" => Some(BackendErrorKind::ExecutionTimeout),
        "backendError" | "internalError" | "rateLimitExceeded" => Some(BackendErrorKind::Connection),
        _ => None,
    }
}

/// Classify a non-2xx API response from its status and error body.
pub fn classify_http_error(status: u16, body: &str) -> BackendError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let reason_kind = envelope
        .as_ref()
        .and_then(|e| e.error.errors.iter().find_map(|p| classify_reason(&p.reason)));
    let kind = reason_kind.unwrap_or(match status {
        408 => BackendErrorKind::ExecutionTimeout,
        401 | 403 | 429 => BackendErrorKind::Connection,
        s if s >= 500 => BackendErrorKind::Connection,
        _ => BackendErrorKind::Execution,
    });
    let message = envelope
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());
    BackendError::new(kind, format!("HTTP {}: {}", status, message))
}

pub fn classify_transport_error(err: &reqwest::Error) -> BackendError {
    let kind = if err.is_timeout() {
        BackendErrorKind::ExecutionTimeout
    } else if err.is_decode() {
        BackendErrorKind::Execution
    } else {
        BackendErrorKind::Connection
    };
    BackendError::new(kind, err.to_string())
}

fn decode_row(fields: &[FieldSchema], row: &TableRow) -> Vec<Value> {
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            row.f
                .get(i)
                .map(|cell| decode_cell(field, &cell.v))
                .unwrap_or(Value::Null)
        })
        .collect()
}

/// Decode one REST cell. The API returns scalars as strings; repeated fields as
/// `[{"v": ..}]`; records as `{"f": [{"v": ..}]}`.
fn decode_cell(field: &FieldSchema, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    if field.is_repeated() {
        return match raw.as_array() {
            Some(items) => Value::Array(
                items
                    .iter()
                    .map(|item| decode_single(field, item.get("v").unwrap_or(&Value::Null)))
                    .collect(),
            ),
            None => raw.clone(),
        };
    }
    decode_single(field, raw)
}

fn decode_single(field: &FieldSchema, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    let text = raw.as_str();
    match field.field_type.as_str() {
        "INTEGER" | "INT64" => text
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| raw.clone()),
        "FLOAT" | "FLOAT64" => text
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| raw.clone()),
        "BOOLEAN" | "BOOL" => text
            .map(|s| Value::from(s.eq_ignore_ascii_case("true")))
            .unwrap_or_else(|| raw.clone()),
        "TIMESTAMP" => text
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(|secs| DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64))
            .map(|ts| Value::from(ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
            .unwrap_or_else(|| raw.clone()),
        "RECORD" | "STRUCT" => {
            let cells = raw.get("f").and_then(Value::as_array);
            match cells {
                Some(cells) => {
                    let mut record = Map::new();
                    for (sub, cell) in field.fields.iter().zip(cells) {
                        let value = cell.get("v").unwrap_or(&Value::Null);
                        record.insert(sub.name.clone(), decode_cell(sub, value));
                    }
                    Value::Object(record)
                }
                None => raw.clone(),
            }
        }
        // STRING, NUMERIC, DATE, DATETIME, TIME, BYTES, GEOGRAPHY, JSON stay textual
        _ => raw.clone(),
    }
}
