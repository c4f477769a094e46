//! # Read-through result cache
//!
//! Dashboard widgets ask for query results with a freshness bound. The
//! cache answers from memory while the stored result is younger than that
//! bound and otherwise fetches through the [`SourceGateway`], storing the
//! new rows before returning them.
//!
//! ## Features
//!
//! - **Per-call freshness**: `get(query, ttl)`; `ttl = 0` forces a fetch
//! - **Request coalescing**: concurrent callers for one descriptor share a single gateway call
//! - **Abandonment-safe**: fetches run as their own tasks and complete even if every caller gives up
//! - **Explicit invalidation**: per descriptor, per table, or everything (refresh button, reconnect)
//! - **LRU bound**: `max_entries` caps memory
//! - **Stale fallback on request**: `get_cached_if_present` after a failed fetch
//!
//! ## Example
//!
//! ```no_run
//! use fraudboard_core::cache::{CacheConfig, ReadThroughCache};
//! use fraudboard_core::gateway::snowflake::SnowflakeGateway;
//! use fraudboard_core::{QueryDescriptor, WarehouseConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let gateway = Arc::new(SnowflakeGateway::new(WarehouseConfig::from_env()?));
//! let cache = ReadThroughCache::new(gateway, CacheConfig::default())?;
//!
//! let query = QueryDescriptor::builder("SELECT * FROM GOLD.FACT_ALERTS WHERE SEVERITY = :sev")
//!     .param("sev", "CRITICAL")
//!     .build()?;
//!
//! let rows = cache.get(&query, Duration::from_secs(600)).await?;
//! println!("{} critical alerts", rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! [`SourceGateway`]: crate::gateway::SourceGateway

pub mod clock;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use store::ReadThroughCache;
pub use types::CacheStats;
