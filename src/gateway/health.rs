//! Source health checks
//!
//! A probe runs `SELECT 1` through a gateway, times it, and classifies the
//! source as healthy, degraded (slow) or unhealthy. This backs the
//! dashboard's connection indicator.

use crate::descriptor::QueryDescriptor;
use crate::gateway::{ConnectionStatus, SourceGateway};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for a single probe
    pub timeout: Duration,
    /// Maximum number of retry attempts after a failed probe
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Response time threshold for degraded state (in milliseconds)
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            degraded_threshold_ms: 1000,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Source is healthy and responsive
    Healthy,
    /// Source is responsive but slow (above degraded threshold)
    Degraded,
    /// Source is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// Connection state observed after the probe
    pub connection: ConnectionStatus,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    /// Probes that failed before this result
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, connection: ConnectionStatus, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            connection,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, connection: ConnectionStatus, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            connection,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }
}

/// Probe `gateway` with `SELECT 1`, retrying failed probes
///
/// Never fails; problems are reported in the result.
pub async fn probe<G>(gateway: &G, config: &HealthCheckConfig) -> HealthCheckResult
where
    G: SourceGateway + ?Sized,
{
    let query = match QueryDescriptor::from_text("SELECT 1") {
        Ok(query) => query,
        Err(e) => {
            return HealthCheckResult::unhealthy(Duration::ZERO, gateway.connection_status(), &e.to_string())
        }
    };

    let mut retry_count = 0;
    loop {
        debug!("Probing {} (attempt {})", gateway.name(), retry_count + 1);
        let start = Instant::now();
        let outcome = tokio::time::timeout(config.timeout, gateway.execute(&query)).await;
        let elapsed = start.elapsed();

        let mut result = match outcome {
            Ok(Ok(_)) => HealthCheckResult::healthy(
                elapsed,
                gateway.connection_status(),
                config.degraded_threshold_ms,
            ),
            Ok(Err(e)) => HealthCheckResult::unhealthy(elapsed, gateway.connection_status(), &e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(
                elapsed,
                gateway.connection_status(),
                &format!("health check timed out after {:?}", config.timeout),
            ),
        };
        result.retry_count = retry_count;

        if result.status.is_operational() || retry_count >= config.max_retries {
            return result;
        }

        retry_count += 1;
        warn!(
            "Health check of {} failed (attempt {}/{}), retrying after {:?}",
            gateway.name(),
            retry_count,
            config.max_retries + 1,
            config.retry_delay
        );
        tokio::time::sleep(config.retry_delay).await;
    }
}
