//! Relational backend over the Postgres wire protocol (Azure Database for
//! PostgreSQL, Cloud SQL, RDS and friends) using a lazily connected `sqlx` pool.

use crate::adapter::BackendAdapter;
use crate::coordinator::ExecutionPolicy;
use crate::credentials::Secret;
use crate::error::{BackendError, BackendErrorKind};
use crate::outcome::{approximate_row_bytes, Column, ResultSet};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as _, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;

pub const ENGINE: &str = "postgres";

/// Pool sizing for one relational backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl Default for RelationalSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl RelationalSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

pub struct RelationalAdapter {
    pool: PgPool,
}

impl RelationalAdapter {
    /// Build the pool without opening a connection. The URL is parsed here, so a
    /// malformed connection string fails at construction rather than per query.
    pub fn connect_lazy(
        settings: &RelationalSettings,
        connection_url: &Secret,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect_lazy(connection_url.expose())?;
        Ok(Self { pool })
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run(&self, query: &str, policy: &ExecutionPolicy) -> Result<ResultSet, BackendError> {
        let max_rows = policy.limits.max_rows;
        let mut stream = sqlx::query(query).fetch(&self.pool);
        let mut columns: Option<Vec<Column>> = None;
        let mut rows = Vec::new();
        let mut bytes = 0usize;

        while let Some(row) = stream.try_next().await.map_err(|e| classify_sqlx_error(&e))? {
            if columns.is_none() {
                columns = Some(describe_columns(&row));
            }
            if rows.len() >= max_rows {
                return Err(BackendError::too_large(format!(
                    "result exceeds {} rows",
                    max_rows
                )));
            }
            let decoded = decode_row(&row);
            bytes = bytes.saturating_add(approximate_row_bytes(&decoded));
            policy.limits.check_bytes(bytes)?;
            rows.push(decoded);
        }

        let result = ResultSet::new(columns.unwrap_or_default(), rows);
        policy.limits.check(&result)?;
        Ok(result)
    }
}

#[async_trait]
impl BackendAdapter for RelationalAdapter {
    fn engine(&self) -> &str {
        ENGINE
    }

    async fn execute(
        &self,
        query: &str,
        policy: &ExecutionPolicy,
    ) -> Result<ResultSet, BackendError> {
        debug!(engine = ENGINE, "Executing relational query");
        match tokio::time::timeout(policy.timeout, self.run(query, policy)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(format!(
                "statement did not finish within {} ms",
                policy.timeout.as_millis()
            ))),
        }
    }
}

/// Map a SQLSTATE code onto the error taxonomy.
pub fn classify_sqlstate(code: &str) -> BackendErrorKind {
    match code {
        // query_canceled, raised by statement_timeout
        "57014" => BackendErrorKind::ExecutionTimeout,
        c if c.starts_with("42") => BackendErrorKind::QuerySyntax,
        c if c.starts_with("08")
            || c.starts_with("28")
            || c.starts_with("53")
            || c.starts_with("57P0") =>
        {
            BackendErrorKind::Connection
        }
        _ => BackendErrorKind::Execution,
    }
}

pub fn classify_sqlx_error(err: &sqlx::Error) -> BackendError {
    let kind = match err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(BackendErrorKind::Execution),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_)
        | sqlx::Error::Configuration(_) => BackendErrorKind::Connection,
        _ => BackendErrorKind::Execution,
    };
    BackendError::new(kind, err.to_string())
}

fn describe_columns(row: &PgRow) -> Vec<Column> {
    row.columns()
        .iter()
        .map(|column| Column::new(column.name(), column.type_info().name()))
        .collect()
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|column| decode_value(row, column.ordinal(), column.type_info().name()))
        .collect()
}

/// Decode one cell by its Postgres type name. Types without a JSON mapping
/// (NUMERIC, arrays, geometric types) come back as null.
fn decode_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let decoded: Result<Option<Value>, sqlx::Error> = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::from)),
        "INT2" => row.try_get::<Option<i16>, _>(index).map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(index).map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|f| Value::from(f as f64))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(|v| v.map(Value::from)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index).map(|v| v.map(Value::from))
        }
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|ts| Value::from(ts.to_rfc3339()))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(|ts| Value::from(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(|v| v.map(|d| Value::from(d.to_string()))),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(|v| v.map(|id| Value::from(id.to_string()))),
        _ => Ok(None),
    };
    match decoded {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(err) => {
            debug!(column = index, type_name, error = %err, "Column decode failed");
            Value::Null
        }
    }
}
