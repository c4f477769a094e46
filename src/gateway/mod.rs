//! Source gateway: executes query descriptors against the remote warehouse
//!
//! The [`SourceGateway`] trait is the seam between the result cache and
//! whatever answers queries. [`snowflake::SnowflakeGateway`] is the
//! production implementation; tests substitute their own.

pub mod connection;
pub mod health;
pub mod retry;
pub mod snowflake;

use crate::descriptor::QueryDescriptor;
use crate::error::{Result, WarehouseError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use connection::{ConnectionLease, ConnectionManager, ConnectionStatus, Connector};
pub use health::{HealthCheckConfig, HealthCheckResult, HealthStatus};
pub use retry::RetryPolicy;

/// One result row: column name to value, in source column order
pub type Row = serde_json::Map<String, Value>;

/// Tabular query result preserving the source's column and row order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column names in source order
    pub columns: Vec<String>,
    /// Rows in source order
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create an empty result with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: unique_columns(columns),
            rows: Vec::new(),
        }
    }

    /// Build a result from positional row values
    ///
    /// Repeated column names get a numeric suffix (`ID`, `ID_2`, ...) so no
    /// value is lost when rows become maps.
    pub fn from_values(columns: Vec<String>, values: Vec<Vec<Value>>) -> Result<Self> {
        let mut result = Self::new(columns);
        for row in values {
            result.push_values(row)?;
        }
        Ok(result)
    }

    /// Append one positional row
    pub fn push_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(WarehouseError::SerializationError(format!(
                "row has {} values but result has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let row: Row = self.columns.iter().cloned().zip(values).collect();
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        if !self.columns.iter().any(|c| c == name) {
            return None;
        }
        Some(self.rows.iter().filter_map(|row| row.get(name)).collect())
    }

    /// Approximate in-memory size in bytes
    pub fn estimated_size(&self) -> usize {
        let header: usize = self.columns.iter().map(|c| c.len()).sum();
        let body: usize = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(k, v)| k.len() + value_size(v))
                    .sum::<usize>()
            })
            .sum();
        header + body
    }
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(value_size).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| k.len() + value_size(v)).sum(),
    }
}

fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(columns.len());
    for name in columns {
        let mut candidate = name.clone();
        let mut n = 2;
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        seen.push(candidate);
    }
    seen
}

/// Executes read-only queries against a remote source
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Execute `query` with its bound parameters and return all rows
    ///
    /// # Errors
    /// `ConnectionError` (retryable), `QueryError` (not retryable) or
    /// `TimeoutError` (retryable).
    async fn execute(&self, query: &QueryDescriptor) -> Result<ResultSet>;

    /// Drop the held connection so the next call establishes a new one
    async fn reset(&self) {}

    /// Current state of the held connection
    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Ready
    }

    /// Probe the source with `SELECT 1`
    async fn health_check(&self) -> HealthCheckResult {
        health::probe(self, &HealthCheckConfig::default()).await
    }

    /// Short name used in logs
    fn name(&self) -> &str {
        "source"
    }
}
