//! Integration tests for the read-through cache
//!
//! Covers freshness per call, request coalescing, fetches that outlive
//! their callers, invalidation while a fetch is running, and failure
//! handling against a scripted gateway.

mod common;

use common::{call_number, query, test_config, wait_until, ScriptedGateway};
use fraudboard_core::catalog::{AlertFilter, Severity, Widget};
use fraudboard_core::{
    CacheConfig, Clock, ConnectionStatus, HealthStatus, ManualClock, ReadThroughCache, RetryPolicy, WarehouseError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn setup(gateway: ScriptedGateway, config: CacheConfig) -> (ReadThroughCache, Arc<ScriptedGateway>, Arc<ManualClock>) {
    let gateway = Arc::new(gateway);
    let clock = Arc::new(ManualClock::new());
    let cache = ReadThroughCache::with_clock(gateway.clone(), config, clock.clone()).unwrap();
    (cache, gateway, clock)
}

#[tokio::test]
async fn test_miss_then_hit() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("VW_FRAUD_SUMMARY");

    let first = cache.get(&q, Duration::from_secs(600)).await.unwrap();
    let second = cache.get(&q, Duration::from_secs(600)).await.unwrap();

    assert_eq!(gateway.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(call_number(&second), 1);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate(), 50.0);
}

#[tokio::test]
async fn test_zero_ttl_always_fetches() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("VW_FRAUD_SUMMARY");

    cache.get(&q, Duration::from_secs(600)).await.unwrap();
    let forced = cache.get(&q, Duration::ZERO).await.unwrap();

    assert_eq!(gateway.calls(), 2);
    assert_eq!(call_number(&forced), 2);

    // The forced result replaced the stored one
    let cached = cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(call_number(&cached), 2);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn test_zero_ttl_queues_behind_running_fetch() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let q = query("VW_FRAUD_SUMMARY");

    let slow = {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
    };
    wait_until("the first fetch to start", || async { gateway.calls() == 1 }).await;

    let spawn_get = |ttl: Duration| {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, ttl).await })
    };

    // Three forced reads share one fetch queued behind the running one
    let mut later: Vec<_> = (0..3).map(|_| spawn_get(Duration::ZERO)).collect();
    wait_until("the forced reads to register", || async { cache.stats().await.misses == 4 }).await;

    // A normal read joins the newest fetch
    later.push(spawn_get(Duration::from_secs(600)));
    wait_until("the normal read to register", || async { cache.stats().await.misses == 5 }).await;

    assert_eq!(gateway.calls(), 1);
    assert_eq!(cache.pending_fetches().await, 2);
    let stats = cache.stats().await;
    assert_eq!(stats.fetches, 2);
    assert_eq!(stats.coalesced, 3);

    gateway.release(2);
    assert_eq!(call_number(&slow.await.unwrap().unwrap()), 1);
    for handle in later {
        assert_eq!(call_number(&handle.await.unwrap().unwrap()), 2);
    }
    assert_eq!(gateway.calls(), 2);
    assert_eq!(gateway.peak(), 1);

    let stored = cache.get_cached_if_present(&q).await.unwrap();
    assert_eq!(call_number(&stored.rows), 2);
    assert_eq!(stored.metadata.ttl, Duration::from_secs(600));
    assert_eq!(stored.metadata.version, 2);
}

#[tokio::test]
async fn test_one_gateway_call_at_a_time_per_descriptor() {
    let (cache, gateway, _) = setup(
        ScriptedGateway::new().with_delay(Duration::from_millis(20)),
        test_config(),
    );
    let q = query("VW_TABLEAU_ALERT_DISTRIBUTION");

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let cache = cache.clone();
            let q = q.clone();
            let ttl = if i % 2 == 0 { Duration::ZERO } else { Duration::from_secs(600) };
            tokio::spawn(async move { cache.get(&q, ttl).await })
        })
        .collect();
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert!(gateway.calls() >= 1);
    assert_eq!(gateway.peak(), 1);
    assert_eq!(cache.pending_fetches().await, 0);
}

#[tokio::test]
async fn test_freshness_is_decided_by_each_caller() {
    let (cache, gateway, clock) = setup(ScriptedGateway::new(), test_config());
    let q = query("VW_TABLEAU_DAILY_TRENDS");
    let ten_minutes = Duration::from_secs(600);

    cache.get(&q, ten_minutes).await.unwrap();

    clock.advance(Duration::from_secs(300));
    let rows = cache.get(&q, ten_minutes).await.unwrap();
    assert_eq!(call_number(&rows), 1);

    clock.advance(Duration::from_secs(400));
    // 700s old: fine for an hourly panel, too old for a ten minute one
    let rows = cache.get(&q, Duration::from_secs(3600)).await.unwrap();
    assert_eq!(call_number(&rows), 1);
    let rows = cache.get(&q, ten_minutes).await.unwrap();
    assert_eq!(call_number(&rows), 2);
    assert_eq!(gateway.calls(), 2);

    let entry = cache.get_cached_if_present(&q).await.unwrap();
    assert_eq!(entry.age(clock.now()), Duration::ZERO);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let q = query("VW_ALERT_DISTRIBUTION");
    let callers = 10;

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let cache = cache.clone();
            let q = q.clone();
            tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
        })
        .collect();

    wait_until("every caller to join the fetch", || async {
        cache.stats().await.misses == callers
    })
    .await;
    assert_eq!(cache.pending_fetches().await, 1);
    gateway.release(1);

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(gateway.calls(), 1);
    assert!(results.iter().all(|rows| Arc::ptr_eq(rows, &results[0])));

    let stats = cache.stats().await;
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.coalesced, callers - 1);
    assert_eq!(cache.pending_fetches().await, 0);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_fetch() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let q = query("VW_CUSTOMER_SEGMENTS");

    let caller = {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
    };
    wait_until("the fetch to start", || async { gateway.calls() == 1 }).await;

    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    gateway.release(1);
    wait_until("the abandoned fetch to be stored", || async { cache.contains(&q).await }).await;

    let rows = cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(call_number(&rows), 1);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_timed_out_caller_does_not_cancel_fetch() {
    let (cache, gateway, _) = setup(
        ScriptedGateway::new().with_delay(Duration::from_millis(50)),
        test_config(),
    );
    let q = query("VW_GEOGRAPHIC_RISK");

    let gave_up = tokio::time::timeout(Duration::from_millis(5), cache.get(&q, Duration::from_secs(600))).await;
    assert!(gave_up.is_err());

    wait_until("the fetch to be stored", || async { cache.contains(&q).await }).await;
    cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let (cache, _, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("VW_KYC_RISK_ANALYSIS");

    cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert!(cache.invalidate(&q).await);
    assert!(!cache.invalidate(&q).await);

    let rows = cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(call_number(&rows), 2);
    assert_eq!(cache.stats().await.invalidations, 1);
}

#[tokio::test]
async fn test_invalidate_during_fetch_discards_result() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let q = query("VW_TIME_PATTERNS");

    let caller = {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
    };
    wait_until("the fetch to start", || async { gateway.calls() == 1 }).await;

    assert!(!cache.invalidate(&q).await);
    assert_eq!(cache.pending_fetches().await, 1);
    assert_eq!(cache.stats().await.detached_fetches, 1);
    gateway.release(1);

    // The waiting caller still receives the rows it asked for
    let rows = caller.await.unwrap().unwrap();
    assert_eq!(call_number(&rows), 1);
    assert!(!cache.contains(&q).await);
    assert_eq!(cache.pending_fetches().await, 0);

    gateway.release(1);
    let rows = cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(call_number(&rows), 2);
}

#[tokio::test]
async fn test_fetch_after_invalidate_waits_for_detached_call() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let q = query("FACT_TRANSACTIONS");

    let detached = {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
    };
    wait_until("the first fetch to start", || async { gateway.calls() == 1 }).await;
    cache.invalidate(&q).await;

    let next = {
        let cache = cache.clone();
        let q = q.clone();
        tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
    };
    wait_until("the second caller to register", || async { cache.stats().await.misses == 2 }).await;

    // Queued behind the detached call instead of joining it
    assert_eq!(gateway.calls(), 1);
    assert_eq!(cache.pending_fetches().await, 2);
    assert_eq!(cache.stats().await.coalesced, 0);

    gateway.release(2);
    assert_eq!(call_number(&detached.await.unwrap().unwrap()), 1);
    assert_eq!(call_number(&next.await.unwrap().unwrap()), 2);
    assert_eq!(gateway.peak(), 1);

    let stored = cache.get_cached_if_present(&q).await.unwrap();
    assert_eq!(call_number(&stored.rows), 2);
    assert_eq!(stored.metadata.version, 1);
}

#[tokio::test]
async fn test_invalidation_counts_detached_fetches() {
    let (cache, gateway, _) = setup(ScriptedGateway::gated(), test_config());
    let alerts = query("FACT_ALERTS");
    let trends = query("VW_TABLEAU_DAILY_TRENDS");

    let callers: Vec<_> = [alerts, trends]
        .into_iter()
        .map(|q| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(&q, Duration::from_secs(600)).await })
        })
        .collect();
    wait_until("both fetches to start", || async { gateway.calls() == 2 }).await;

    assert_eq!(cache.invalidate_table("fact_alerts").await, 0);
    assert_eq!(cache.stats().await.detached_fetches, 1);
    // Already detached flights are not counted twice
    assert_eq!(cache.invalidate_all().await, 0);
    assert_eq!(cache.stats().await.detached_fetches, 2);

    gateway.release(2);
    for caller in callers {
        assert_ok!(caller.await.unwrap());
    }
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_panicking_fetch_does_not_block_later_fetches() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("DIM_CUSTOMER");
    gateway.panic_once();

    let err = assert_err!(cache.get(&q, Duration::from_secs(600)).await);
    assert!(matches!(err, WarehouseError::FetchError { .. }));
    assert_eq!(cache.pending_fetches().await, 0);
    assert_eq!(cache.stats().await.fetch_failures, 1);

    let rows = assert_ok!(cache.get(&q, Duration::from_secs(600)).await);
    assert_eq!(call_number(&rows), 2);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_entry() {
    let (cache, gateway, clock) = setup(ScriptedGateway::new(), test_config());
    let q = query("FACT_ALERTS");

    cache.get(&q, Duration::from_secs(60)).await.unwrap();
    clock.advance(Duration::from_secs(120));
    gateway.push_error(WarehouseError::QueryError("Object 'GOLD.FACT_ALERTS' does not exist".into()));

    let err = assert_err!(cache.get(&q, Duration::from_secs(60)).await);
    assert!(matches!(err, WarehouseError::FetchError { .. }));
    assert!(matches!(err.root_cause(), WarehouseError::QueryError(_)));
    // Query errors are not retried
    assert_eq!(gateway.calls(), 2);

    let stale = cache.get_cached_if_present(&q).await.unwrap();
    assert_eq!(call_number(&stale.rows), 1);
    assert_eq!(stale.age(clock.now()), Duration::from_secs(120));
    assert_eq!(cache.stats().await.fetch_failures, 1);
}

#[tokio::test]
async fn test_failed_fetch_without_entry() {
    let config = CacheConfig::builder()
        .cleanup_interval(None)
        .retry(RetryPolicy::none())
        .build();
    let (cache, gateway, _) = setup(ScriptedGateway::new(), config);
    let q = query("FACT_TRANSACTIONS");
    gateway.push_error(WarehouseError::ConnectionError("connection reset".into()));

    let err = assert_err!(cache.get(&q, Duration::from_secs(600)).await);
    assert!(err.is_retryable());
    assert!(cache.get_cached_if_present(&q).await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_transient_errors_are_retried_within_one_fetch() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("FACT_TRANSACTIONS");
    gateway.push_error(WarehouseError::ConnectionError("connection reset".into()));

    let rows = assert_ok!(cache.get(&q, Duration::from_secs(600)).await);
    assert_eq!(call_number(&rows), 2);
    assert_eq!(gateway.connects(), 2);
    assert_eq!(cache.stats().await.fetches, 1);
}

#[tokio::test]
async fn test_next_get_reconnects_after_connection_error() {
    let config = CacheConfig::builder()
        .cleanup_interval(None)
        .retry(RetryPolicy::none())
        .build();
    let (cache, gateway, _) = setup(ScriptedGateway::new(), config);
    let q = query("FACT_TRANSACTIONS");

    cache.get(&q, Duration::ZERO).await.unwrap();
    assert_eq!(cache.connection_status(), ConnectionStatus::Ready);

    gateway.push_error(WarehouseError::ConnectionError("session expired".into()));
    assert_err!(cache.get(&q, Duration::ZERO).await);
    assert_eq!(cache.connection_status(), ConnectionStatus::Invalid);

    assert_ok!(cache.get(&q, Duration::ZERO).await);
    assert_eq!(cache.connection_status(), ConnectionStatus::Ready);
    assert_eq!(gateway.connects(), 2);
}

#[tokio::test]
async fn test_fetch_timeout() {
    let config = CacheConfig::builder()
        .cleanup_interval(None)
        .fetch_timeout(Duration::from_millis(20))
        .retry(RetryPolicy::none())
        .build();
    let (cache, _, _) = setup(ScriptedGateway::new().with_delay(Duration::from_millis(500)), config);

    let err = cache.get(&query("FACT_ALERTS"), Duration::from_secs(600)).await.unwrap_err();
    assert!(matches!(err.root_cause(), WarehouseError::TimeoutError { .. }));
}

#[tokio::test]
async fn test_lru_eviction_keeps_recently_read_entries() {
    let config = CacheConfig::builder().cleanup_interval(None).max_entries(2).build();
    let (cache, gateway, _) = setup(ScriptedGateway::new(), config);
    let ttl = Duration::from_secs(600);
    let (summary, trends, segments) = (
        query("VW_FRAUD_SUMMARY"),
        query("VW_TABLEAU_DAILY_TRENDS"),
        query("VW_CUSTOMER_SEGMENTS"),
    );

    cache.get(&summary, ttl).await.unwrap();
    cache.get(&trends, ttl).await.unwrap();
    cache.get(&summary, ttl).await.unwrap();
    cache.get(&segments, ttl).await.unwrap();

    assert_eq!(cache.len().await, 2);
    assert!(cache.contains(&summary).await);
    assert!(!cache.contains(&trends).await);

    cache.get(&trends, ttl).await.unwrap();
    assert_eq!(gateway.calls(), 4);
    assert_eq!(cache.stats().await.evictions_lru, 2);
}

#[tokio::test]
async fn test_invalidate_all() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    for table in ["VW_FRAUD_SUMMARY", "VW_ALERT_DISTRIBUTION", "VW_TIME_PATTERNS"] {
        cache.get(&query(table), Duration::from_secs(600)).await.unwrap();
    }

    assert_eq!(cache.invalidate_all().await, 3);
    assert!(cache.is_empty().await);
    assert_eq!(cache.stats().await.size_bytes, 0);

    cache.get(&query("VW_FRAUD_SUMMARY"), Duration::from_secs(600)).await.unwrap();
    assert_eq!(gateway.calls(), 4);
}

#[tokio::test]
async fn test_reconnect_resets_gateway_and_clears() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());
    let q = query("VW_FRAUD_SUMMARY");
    cache.get(&q, Duration::from_secs(600)).await.unwrap();

    assert_eq!(cache.reconnect().await, 1);
    assert_eq!(gateway.resets(), 1);
    assert_eq!(cache.connection_status(), ConnectionStatus::Invalid);

    cache.get(&q, Duration::from_secs(600)).await.unwrap();
    assert_eq!(gateway.connects(), 2);
}

#[tokio::test]
async fn test_health_check_through_cache() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());

    let result = cache.health_check().await;
    assert_eq!(result.status, HealthStatus::Healthy);
    assert_eq!(result.connection, ConnectionStatus::Ready);
    assert_eq!(gateway.calls(), 1);
    // Probes bypass the cache
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_dashboard_widgets_and_filters() {
    let (cache, gateway, _) = setup(ScriptedGateway::new(), test_config());

    for widget in Widget::ALL {
        cache.get(&widget.descriptor().unwrap(), widget.recommended_ttl()).await.unwrap();
    }
    for widget in Widget::ALL {
        cache.get(&widget.descriptor().unwrap(), widget.recommended_ttl()).await.unwrap();
    }
    assert_eq!(gateway.calls(), Widget::ALL.len() as u32);

    // The same selection made twice is one entry
    let critical = AlertFilter::default().severities([Severity::Critical]);
    cache.get_default(&critical.descriptor().unwrap()).await.unwrap();
    cache.get_default(&critical.clone().descriptor().unwrap()).await.unwrap();
    assert_eq!(gateway.calls(), Widget::ALL.len() as u32 + 1);

    assert_eq!(cache.invalidate_table("VW_TABLEAU_FRAUD_SUMMARY").await, 1);
    assert_eq!(cache.invalidate_table("DIM_ALERT_TYPE").await, 1);
}
