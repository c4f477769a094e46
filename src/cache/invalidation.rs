//! Records of entries leaving the cache
//!
//! Freshness is decided per call from the caller's ttl, so nothing here
//! decides *whether* an entry is usable. These types describe why entries
//! were removed, for logs and for callers of the bulk operations.

use crate::descriptor::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry outlived its ttl plus the stale retention window
    Expired,

    /// Manual invalidation of one descriptor
    Manual,

    /// Whole cache cleared (refresh button)
    Cleared,

    /// A table the query reads was reported as changed
    TableChanged { table: String },

    /// Credentials rotated or connection replaced
    Reconnected,

    /// Evicted by LRU policy
    LeastRecentlyUsed,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "retention expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::Cleared => write!(f, "cache cleared"),
            InvalidationReason::TableChanged { table } => write!(f, "table changed: {}", table),
            InvalidationReason::Reconnected => write!(f, "reconnected"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
        }
    }
}

/// A batch of entries removed for one reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<CacheKey>,

    /// In-flight fetches whose results will not be stored
    pub detached_fetches: usize,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, timestamp: DateTime<Utc>, keys: Vec<CacheKey>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
            detached_fetches: 0,
        }
    }

    pub fn with_detached(mut self, detached: usize) -> Self {
        self.detached_fetches = detached;
        self
    }

    /// Number of entries removed
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.detached_fetches == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::QueryDescriptor;

    #[test]
    fn test_invalidation_reason_display() {
        assert_eq!(InvalidationReason::Expired.to_string(), "retention expired");
        assert_eq!(
            InvalidationReason::TableChanged {
                table: "GOLD.FACT_ALERTS".into()
            }
            .to_string(),
            "table changed: GOLD.FACT_ALERTS"
        );
    }

    #[test]
    fn test_invalidation_event() {
        let key = QueryDescriptor::from_text("SELECT 1").unwrap().cache_key().clone();
        let event = InvalidationEvent::new(InvalidationReason::Cleared, Utc::now(), vec![key]).with_detached(2);

        assert_eq!(event.len(), 1);
        assert_eq!(event.detached_fetches, 2);
        assert!(!event.is_empty());
        assert!(InvalidationEvent::new(InvalidationReason::Manual, Utc::now(), Vec::new()).is_empty());
    }
}
