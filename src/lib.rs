//! # fraudboard-core
//!
//! Data access for the fraud detection dashboard: a bounded-staleness
//! read-through cache in front of a Snowflake warehouse.
//!
//! ## Features
//!
//! - Validated, structurally comparable query descriptors with bound parameters
//! - Read-through cache with per-call ttl, request coalescing and explicit invalidation
//! - Snowflake SQL API gateway with a lazily created, self-healing connection
//! - `SELECT 1` health probe with degraded-state detection
//! - Catalog of the dashboard's views and filtered fact queries
//!
//! ## Example
//!
//! ```no_run
//! use fraudboard_core::catalog::{AlertFilter, Severity, Widget};
//! use fraudboard_core::gateway::snowflake::SnowflakeGateway;
//! use fraudboard_core::{ReadThroughCache, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let gateway = Arc::new(SnowflakeGateway::new(settings.warehouse));
//!     let cache = ReadThroughCache::new(gateway, settings.cache)?;
//!
//!     let summary = Widget::FraudSummary;
//!     let rows = cache.get(&summary.descriptor()?, summary.recommended_ttl()).await?;
//!     println!("{:?}", rows.rows.first());
//!
//!     let critical = AlertFilter::default().severities([Severity::Critical]).descriptor()?;
//!     match cache.get_default(&critical).await {
//!         Ok(alerts) => println!("{} alerts", alerts.len()),
//!         // Show the last known rows, if any, instead of an empty table
//!         Err(e) => match cache.get_cached_if_present(&critical).await {
//!             Some(entry) => println!("{} alerts (stale: {})", entry.rows.len(), e),
//!             None => return Err(e.into()),
//!         },
//!     }
//!
//!     // Refresh button
//!     cache.invalidate_all().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod gateway;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheConfigBuilder, CacheEntry, CacheStats, Clock, ManualClock, ReadThroughCache, SystemClock};
pub use config::{Settings, TokenType, WarehouseConfig};
pub use descriptor::{CacheKey, ParamValue, QueryDescriptor};
pub use error::{Result, WarehouseError};
pub use gateway::{
    ConnectionStatus, HealthCheckConfig, HealthCheckResult, HealthStatus, ResultSet, RetryPolicy, Row,
    SourceGateway,
};
