//! Shared test helpers: a scriptable in-memory gateway

#![allow(dead_code)]

use async_trait::async_trait;
use fraudboard_core::{
    CacheConfig, ConnectionStatus, QueryDescriptor, ResultSet, RetryPolicy, SourceGateway, WarehouseError,
};
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Gateway whose answers are scripted by the test
///
/// Without a script entry, a call answers one row `{QUERY, CALL}` where
/// `CALL` is the 1-based call number. A `ConnectionError` marks the
/// simulated connection invalid; the next call reconnects. The highest
/// number of calls running at the same time is recorded in `peak`.
pub struct ScriptedGateway {
    calls: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
    panic_next: AtomicBool,
    connects: AtomicU32,
    resets: AtomicU32,
    script: Mutex<VecDeque<Result<ResultSet, WarehouseError>>>,
    status: Mutex<ConnectionStatus>,
    delay: Duration,
    gate: Option<Semaphore>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            panic_next: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            resets: AtomicU32::new(0),
            script: Mutex::new(VecDeque::new()),
            status: Mutex::new(ConnectionStatus::Uninitialized),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    /// Every call waits for [`release`](Self::release) before answering
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the outcome of the next unscripted call
    pub fn push(&self, outcome: Result<ResultSet, WarehouseError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_error(&self, error: WarehouseError) {
        self.push(Err(error));
    }

    /// Make the next call panic, as a bug in a driver would
    pub fn panic_once(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Let `n` gated calls proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever running at once
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceGateway for ScriptedGateway {
    async fn execute(&self, query: &QueryDescriptor) -> fraudboard_core::Result<ResultSet> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted gateway panicked on call {}", call);
        }

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let outcome = self.answer(query, call).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap();
        if *status == ConnectionStatus::Ready {
            *status = ConnectionStatus::Invalid;
        }
    }

    fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl ScriptedGateway {
    async fn answer(&self, query: &QueryDescriptor, call: u32) -> fraudboard_core::Result<ResultSet> {
        {
            let mut status = self.status.lock().unwrap();
            if *status != ConnectionStatus::Ready {
                self.connects.fetch_add(1, Ordering::SeqCst);
                *status = ConnectionStatus::Ready;
            }
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(e)) => {
                if matches!(e, WarehouseError::ConnectionError(_)) {
                    *self.status.lock().unwrap() = ConnectionStatus::Invalid;
                }
                Err(e)
            }
            Some(Ok(rows)) => Ok(rows),
            None => ResultSet::from_values(
                vec!["QUERY".into(), "CALL".into()],
                vec![vec![json!(query.text()), json!(call)]],
            ),
        }
    }
}

/// Cache settings for tests: no background task, fast retries
pub fn test_config() -> CacheConfig {
    CacheConfig::builder()
        .cleanup_interval(None)
        .retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        })
        .build()
}

pub fn query(table: &str) -> QueryDescriptor {
    QueryDescriptor::from_text(format!("SELECT * FROM GOLD.{}", table)).unwrap()
}

/// The `CALL` column of the first row
pub fn call_number(rows: &ResultSet) -> u64 {
    rows.rows[0]["CALL"].as_u64().unwrap()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
