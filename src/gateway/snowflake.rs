//! Snowflake SQL API gateway
//!
//! Statements are submitted to `POST /api/v2/statements` with positional
//! bindings. A `202 Accepted` response means the statement is still running
//! and is polled through its handle; large results arrive in several
//! partitions which are fetched in order and concatenated.

use crate::config::WarehouseConfig;
use crate::descriptor::{ParamValue, QueryDescriptor};
use crate::error::{Result, WarehouseError};
use crate::gateway::{ConnectionManager, ConnectionStatus, Connector, ResultSet, SourceGateway};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const STATEMENTS_PATH: &str = "/api/v2/statements";
const TOKEN_TYPE_HEADER: &str = "x-snowflake-authorization-token-type";
const USER_AGENT: &str = concat!("fraudboard-core/", env!("CARGO_PKG_VERSION"));

/// One positional binding in a statement request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: Option<String>,
}

impl Binding {
    fn from_param(value: &ParamValue) -> Self {
        match value {
            ParamValue::Null => Binding {
                kind: "TEXT",
                value: None,
            },
            ParamValue::Bool(b) => Binding {
                kind: "BOOLEAN",
                value: Some(b.to_string()),
            },
            ParamValue::Int(i) => Binding {
                kind: "FIXED",
                value: Some(i.to_string()),
            },
            ParamValue::Float(f) => Binding {
                kind: "REAL",
                value: Some(f.to_string()),
            },
            ParamValue::Text(s) => Binding {
                kind: "TEXT",
                value: Some(s.clone()),
            },
            // Dates travel as ISO text and are cast by the warehouse
            ParamValue::Date(d) => Binding {
                kind: "TEXT",
                value: Some(d.format("%Y-%m-%d").to_string()),
            },
            ParamValue::Timestamp(ts) => Binding {
                kind: "TEXT",
                value: Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            },
            ParamValue::List(_) => Binding {
                kind: "TEXT",
                value: Some(value.to_string()),
            },
        }
    }
}

/// Rewrite `:name` placeholders to `?` markers and collect their bindings
///
/// List values expand to one marker per element, so `IN (:ids)` becomes
/// `IN (?, ?, ?)`.
pub fn bind_positional(query: &QueryDescriptor) -> Result<(String, BTreeMap<String, Binding>)> {
    let text = query.text();
    let mut sql = String::with_capacity(text.len());
    let mut bindings = BTreeMap::new();
    let mut last = 0;
    let mut index = 0usize;

    for placeholder in query.placeholders() {
        let value = query.param(&placeholder.name).ok_or_else(|| {
            WarehouseError::ValidationError(format!("no value bound to :{}", placeholder.name))
        })?;
        sql.push_str(&text[last..placeholder.span.start]);

        let items: Vec<&ParamValue> = match value {
            ParamValue::List(items) => items.iter().collect(),
            single => vec![single],
        };
        let markers: Vec<&str> = items
            .into_iter()
            .map(|item| {
                index += 1;
                bindings.insert(index.to_string(), Binding::from_param(item));
                "?"
            })
            .collect();
        sql.push_str(&markers.join(", "));
        last = placeholder.span.end;
    }
    sql.push_str(&text[last..]);

    Ok((sql, bindings))
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: &'a BTreeMap<String, Binding>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
    #[serde(default)]
    partition_info: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ColumnType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionInfo {
    #[serde(default)]
    row_count: Option<u64>,
}

/// Convert one cell of the JSON result format to a typed value
fn convert_cell(raw: Option<String>, column: &ColumnType) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let kind = column.kind.to_ascii_lowercase();

    let converted = match kind.as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => raw
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .or_else(|| float_value(&raw)),
        "fixed" | "real" | "float" | "double" => float_value(&raw),
        "boolean" => match raw.as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        "date" => raw.parse::<i64>().ok().and_then(|days| {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
            let date = epoch.checked_add_signed(chrono::Duration::try_days(days)?)?;
            Some(Value::String(date.format("%Y-%m-%d").to_string()))
        }),
        "time" => epoch_parts(&raw).and_then(|(secs, nanos)| {
            let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)?;
            Some(Value::String(time.format("%H:%M:%S%.f").to_string()))
        }),
        "timestamp_ntz" => epoch_parts(&raw).and_then(|(secs, nanos)| {
            let ts = DateTime::from_timestamp(secs, nanos)?.naive_utc();
            Some(Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        }),
        "timestamp_ltz" => epoch_parts(&raw).and_then(|(secs, nanos)| {
            Some(Value::String(DateTime::from_timestamp(secs, nanos)?.to_rfc3339()))
        }),
        "timestamp_tz" => {
            let mut parts = raw.split_whitespace();
            let instant = parts.next().and_then(epoch_parts);
            let offset = parts
                .next()
                .and_then(|o| o.parse::<i32>().ok())
                .and_then(|o| FixedOffset::east_opt((o - 1440) * 60));
            match (instant, offset) {
                (Some((secs, nanos)), Some(offset)) => DateTime::from_timestamp(secs, nanos)
                    .map(|ts| Value::String(ts.with_timezone(&offset).to_rfc3339())),
                _ => None,
            }
        }
        "variant" | "object" | "array" => serde_json::from_str(&raw).ok(),
        _ => None,
    };

    converted.unwrap_or(Value::String(raw))
}

fn float_value(raw: &str) -> Option<Value> {
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Split `seconds.fraction` into whole seconds and nanoseconds
fn epoch_parts(raw: &str) -> Option<(i64, u32)> {
    let (secs, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let secs = secs.parse::<i64>().ok()?;
    if fraction.is_empty() {
        return Some((secs, 0));
    }
    let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
    let nanos = digits.parse::<u32>().ok()?;
    // "-0.5" parses its whole part as 0, so the sign comes from the text
    if raw.trim_start().starts_with('-') && nanos > 0 {
        // -1.5 means one and a half seconds before the epoch
        return Some((secs - 1, 1_000_000_000 - nanos));
    }
    Some((secs, nanos))
}

/// Map a non-success HTTP status to the error taxonomy
fn status_error(status: StatusCode, body: &str) -> WarehouseError {
    let message = serde_json::from_str::<StatementResponse>(body)
        .ok()
        .and_then(|r| match (r.code, r.message) {
            (Some(code), Some(message)) => Some(format!("{} ({})", message, code)),
            (None, Some(message)) => Some(message),
            _ => None,
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            WarehouseError::ConnectionError(format!("authentication rejected: {}", message))
        }
        StatusCode::REQUEST_TIMEOUT => WarehouseError::timeout(Duration::ZERO, message),
        StatusCode::TOO_MANY_REQUESTS => {
            WarehouseError::ConnectionError(format!("rate limited: {}", message))
        }
        s if s.is_server_error() => {
            WarehouseError::ConnectionError(format!("warehouse unavailable: {}", message))
        }
        _ => WarehouseError::QueryError(message),
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> WarehouseError {
    if e.is_timeout() {
        WarehouseError::timeout(timeout, "waiting for warehouse response")
    } else {
        WarehouseError::ConnectionError(e.to_string())
    }
}

/// An authenticated HTTP session bound to one warehouse context
pub struct SnowflakeSession {
    client: Client,
    base_url: String,
    database: String,
    schema: String,
    warehouse: String,
    role: Option<String>,
    query_timeout: Duration,
    poll_interval: Duration,
}

impl SnowflakeSession {
    fn open(config: &WarehouseConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| WarehouseError::ConfigError("token contains invalid characters".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(TOKEN_TYPE_HEADER, HeaderValue::from_static(config.token_type.header_value()));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| WarehouseError::ConnectionError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            query_timeout: config.query_timeout,
            poll_interval: config.poll_interval,
        })
    }

    /// Run a statement to completion, bounded by the query timeout
    pub async fn run(&self, sql: &str, bindings: &BTreeMap<String, Binding>) -> Result<ResultSet> {
        match tokio::time::timeout(self.query_timeout, self.run_unbounded(sql, bindings)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::timeout(self.query_timeout, "statement execution")),
        }
    }

    async fn run_unbounded(&self, sql: &str, bindings: &BTreeMap<String, Binding>) -> Result<ResultSet> {
        let request = StatementRequest {
            statement: sql,
            timeout: self.query_timeout.as_secs().max(1),
            database: &self.database,
            schema: &self.schema,
            warehouse: &self.warehouse,
            role: self.role.as_deref(),
            bindings,
        };
        let request_id = Uuid::new_v4().to_string();

        let response = self
            .client
            .post(format!("{}{}", self.base_url, STATEMENTS_PATH))
            .query(&[("requestId", request_id.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.query_timeout))?;

        let mut status = response.status();
        let mut payload = self.read_payload(response).await?;

        while status == StatusCode::ACCEPTED {
            let handle = payload.statement_handle.clone().ok_or_else(|| {
                WarehouseError::SerializationError("accepted statement has no handle".into())
            })?;
            debug!(%handle, "Statement still running, polling");
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(self.statement_url(&handle))
                .send()
                .await
                .map_err(|e| transport_error(e, self.query_timeout))?;
            status = response.status();
            payload = self.read_payload(response).await?;
        }

        self.collect(payload).await
    }

    async fn read_payload(&self, response: reqwest::Response) -> Result<StatementResponse> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, self.query_timeout))?;

        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(StatementResponse::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn collect(&self, first: StatementResponse) -> Result<ResultSet> {
        let meta = first.result_set_meta_data.unwrap_or_default();
        let columns: Vec<String> = meta.row_type.iter().map(|c| c.name.clone()).collect();
        let expected_rows: u64 = meta.partition_info.iter().filter_map(|p| p.row_count).sum();
        let mut result = ResultSet::new(columns);

        self.append_rows(&mut result, first.data, &meta.row_type)?;

        if meta.partition_info.len() > 1 {
            let handle = first.statement_handle.ok_or_else(|| {
                WarehouseError::SerializationError("partitioned result has no statement handle".into())
            })?;
            for partition in 1..meta.partition_info.len() {
                debug!(%handle, partition, "Fetching result partition");
                let response = self
                    .client
                    .get(self.statement_url(&handle))
                    .query(&[("partition", partition)])
                    .send()
                    .await
                    .map_err(|e| transport_error(e, self.query_timeout))?;
                let page = self.read_payload(response).await?;
                self.append_rows(&mut result, page.data, &meta.row_type)?;
            }
        }

        if expected_rows > 0 && result.len() as u64 != expected_rows {
            warn!(
                expected = expected_rows,
                received = result.len(),
                "Row count differs from partition metadata"
            );
        }
        Ok(result)
    }

    fn append_rows(
        &self,
        result: &mut ResultSet,
        data: Vec<Vec<Option<String>>>,
        row_type: &[ColumnType],
    ) -> Result<()> {
        for row in data {
            let values = row
                .into_iter()
                .zip(row_type.iter())
                .map(|(cell, column)| convert_cell(cell, column))
                .collect();
            result.push_values(values)?;
        }
        Ok(())
    }

    fn statement_url(&self, handle: &str) -> String {
        format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle)
    }
}

/// Opens sessions and validates them with `SELECT 1`
pub struct SnowflakeConnector {
    config: RwLock<WarehouseConfig>,
}

impl SnowflakeConnector {
    pub fn new(config: WarehouseConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    fn snapshot(&self) -> WarehouseConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, config: WarehouseConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    type Connection = SnowflakeSession;

    async fn connect(&self) -> Result<SnowflakeSession> {
        let config = self.snapshot();
        config.validate()?;
        let session = SnowflakeSession::open(&config)?;
        session.run("SELECT 1", &BTreeMap::new()).await?;
        Ok(session)
    }

    fn describe(&self) -> String {
        let config = self.snapshot();
        format!(
            "Snowflake account {} (warehouse {}, {}.{})",
            config.account, config.warehouse, config.database, config.schema
        )
    }
}

/// Production [`SourceGateway`] backed by the Snowflake SQL API
pub struct SnowflakeGateway {
    connections: ConnectionManager<SnowflakeConnector>,
}

impl SnowflakeGateway {
    pub fn new(config: WarehouseConfig) -> Self {
        let connect_timeout = config.connect_timeout;
        Self {
            connections: ConnectionManager::new(SnowflakeConnector::new(config), connect_timeout),
        }
    }

    /// Swap in new credentials; the next query reconnects with them
    pub async fn rotate_credentials(&self, config: WarehouseConfig) -> Result<()> {
        config.validate()?;
        self.connections.connector().replace(config);
        self.connections.reset().await;
        info!("Warehouse credentials rotated");
        Ok(())
    }

    /// Number of sessions opened so far
    pub fn connection_generation(&self) -> u64 {
        self.connections.generation()
    }
}

#[async_trait]
impl SourceGateway for SnowflakeGateway {
    #[instrument(skip_all, fields(query = %query.summary()))]
    async fn execute(&self, query: &QueryDescriptor) -> Result<ResultSet> {
        let (sql, bindings) = bind_positional(query)?;
        let lease = self.connections.acquire().await?;

        let start = Instant::now();
        match lease.connection.run(&sql, &bindings).await {
            Ok(result) => {
                debug!(rows = result.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Query completed");
                Ok(result)
            }
            Err(e @ WarehouseError::ConnectionError(_)) => {
                self.connections.invalidate(lease.generation).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn reset(&self) {
        self.connections.reset().await;
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.connections.status()
    }

    fn name(&self) -> &str {
        "snowflake"
    }
}
