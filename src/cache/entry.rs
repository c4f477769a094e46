//! Cached query results with freshness metadata

use crate::descriptor::QueryDescriptor;
use crate::gateway::ResultSet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A stored result for one query descriptor
///
/// Entries are replaced as a whole on refresh, so a reader holding the
/// `Arc` of an older result never sees it change.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub descriptor: QueryDescriptor,

    /// The cached rows
    pub rows: Arc<ResultSet>,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(
        descriptor: QueryDescriptor,
        rows: Arc<ResultSet>,
        fetched_at: Instant,
        fetched_at_wall: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let tables = descriptor.referenced_tables();
        let size_bytes = descriptor.text().len() + rows.estimated_size();

        Self {
            descriptor,
            rows,
            metadata: CacheMetadata {
                fetched_at,
                fetched_at_wall,
                ttl,
                access_count: 0,
                size_bytes,
                version: 1,
                tables,
            },
        }
    }

    /// Whether the entry is still fresh at `now` under the caller's `ttl`
    ///
    /// A zero `ttl` is never fresh.
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) < ttl
    }

    /// Whether the entry outlived its stored ttl by at least `grace`
    pub fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        self.age(now) >= self.metadata.ttl.saturating_add(grace)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.metadata.fetched_at)
    }

    /// Time left under the stored ttl, `None` once stale
    pub fn time_until_stale(&self, now: Instant) -> Option<Duration> {
        self.metadata.ttl.checked_sub(self.age(now)).filter(|d| !d.is_zero())
    }

    pub(crate) fn mark_accessed(&mut self) {
        self.metadata.access_count += 1;
    }

    /// Check if the descriptor reads from `table`
    pub fn has_table(&self, table: &str) -> bool {
        self.descriptor.references_table(table)
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetadata {
    /// When the fetch that produced the rows started
    #[serde(skip)]
    pub fetched_at: Instant,

    /// Wall-clock time of `fetched_at`, for display
    pub fetched_at_wall: DateTime<Utc>,

    /// Freshness window the entry was stored with
    pub ttl: Duration,

    /// Number of hits served from this entry
    pub access_count: u64,

    /// Approximate size of the entry in bytes
    pub size_bytes: usize,

    /// Incremented each time the descriptor is refreshed
    pub version: u64,

    /// Tables the query reads, used by `invalidate_table`
    pub tables: BTreeSet<String>,
}

impl CacheMetadata {
    /// Check if metadata indicates a hot entry (frequently accessed)
    pub fn is_hot(&self, threshold: u64) -> bool {
        self.access_count >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(ttl: Duration, at: Instant) -> CacheEntry {
        let descriptor = QueryDescriptor::builder(
            "SELECT * FROM GOLD.FACT_ALERTS a JOIN GOLD.DIM_CUSTOMER c ON a.CUSTOMER_ID = c.CUSTOMER_ID WHERE SEVERITY = :sev",
        )
        .param("sev", "CRITICAL")
        .build()
        .unwrap();
        let rows = ResultSet::from_values(vec!["ALERT_ID".into()], vec![vec![json!(1)]]).unwrap();
        CacheEntry::new(descriptor, Arc::new(rows), at, Utc::now(), ttl)
    }

    #[test]
    fn test_freshness_boundary() {
        let t0 = Instant::now();
        let entry = entry(Duration::from_secs(600), t0);

        assert!(entry.is_fresh(t0 + Duration::from_secs(300), Duration::from_secs(600)));
        assert!(!entry.is_fresh(t0 + Duration::from_secs(600), Duration::from_secs(600)));
        assert!(!entry.is_fresh(t0, Duration::ZERO));
        // The caller's ttl decides, not the stored one
        assert!(!entry.is_fresh(t0 + Duration::from_secs(120), Duration::from_secs(60)));
    }

    #[test]
    fn test_expiry_with_grace() {
        let t0 = Instant::now();
        let entry = entry(Duration::from_secs(60), t0);

        assert!(!entry.is_expired(t0 + Duration::from_secs(90), Duration::from_secs(60)));
        assert!(entry.is_expired(t0 + Duration::from_secs(120), Duration::from_secs(60)));
        assert_eq!(
            entry.time_until_stale(t0 + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
        assert_eq!(entry.time_until_stale(t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_tables_and_size() {
        let entry = entry(Duration::from_secs(60), Instant::now());
        assert!(entry.has_table("FACT_ALERTS"));
        assert!(entry.has_table("gold.dim_customer"));
        assert!(!entry.has_table("FACT_TRANSACTIONS"));
        assert!(entry.metadata.tables.contains("GOLD.FACT_ALERTS"));
        assert!(entry.metadata.size_bytes > 0);
        assert_eq!(entry.metadata.version, 1);
    }

    #[test]
    fn test_access_count() {
        let mut entry = entry(Duration::from_secs(60), Instant::now());
        entry.mark_accessed();
        entry.mark_accessed();
        assert!(entry.metadata.is_hot(2));
        assert!(!entry.metadata.is_hot(3));
    }
}
