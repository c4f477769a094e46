//! Process-wide connection handle with an explicit state machine
//!
//! `Uninitialized -> Connecting -> Ready -> (error) Invalid -> Connecting -> Ready ...`
//!
//! Every transition happens under one async mutex, so callers arriving
//! while a connection is being established wait for that attempt instead
//! of starting their own.

use crate::error::{Result, WarehouseError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Establishes new connections to a source
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Open and validate a new connection
    async fn connect(&self) -> Result<Self::Connection>;

    /// Human-readable target for logs; must not contain secrets
    fn describe(&self) -> String;
}

/// Observable state of the connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Uninitialized,
    Connecting,
    Ready,
    Invalid,
}

impl ConnectionStatus {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionStatus::Uninitialized => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Ready => 2,
            ConnectionStatus::Invalid => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Ready,
            3 => ConnectionStatus::Invalid,
            _ => ConnectionStatus::Uninitialized,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Uninitialized => write!(f, "uninitialized"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Ready => write!(f, "ready"),
            ConnectionStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// A ready connection together with the generation it belongs to
pub struct ConnectionLease<C> {
    pub connection: Arc<C>,
    /// Pass back to [`ConnectionManager::invalidate`] when this connection fails
    pub generation: u64,
}

enum Slot<C> {
    Empty,
    Ready { connection: Arc<C>, generation: u64 },
}

/// Lazily created, shared connection handle
pub struct ConnectionManager<K: Connector> {
    connector: K,
    slot: Mutex<Slot<K::Connection>>,
    status: AtomicU8,
    generation: AtomicU64,
    connect_timeout: Duration,
}

impl<K: Connector> ConnectionManager<K> {
    pub fn new(connector: K, connect_timeout: Duration) -> Self {
        Self {
            connector,
            slot: Mutex::new(Slot::Empty),
            status: AtomicU8::new(ConnectionStatus::Uninitialized.as_u8()),
            generation: AtomicU64::new(0),
            connect_timeout,
        }
    }

    /// Return the ready connection, establishing one first if needed
    ///
    /// # Errors
    /// `ConnectionError` if the connector fails, `TimeoutError` if it does
    /// not finish within the connect timeout. Either leaves the handle
    /// `Invalid`.
    pub async fn acquire(&self) -> Result<ConnectionLease<K::Connection>> {
        let mut slot = self.slot.lock().await;

        if let Slot::Ready {
            connection,
            generation,
        } = &*slot
        {
            return Ok(ConnectionLease {
                connection: Arc::clone(connection),
                generation: *generation,
            });
        }

        self.set_status(ConnectionStatus::Connecting);
        info!("Connecting to {}", self.connector.describe());

        match tokio::time::timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(Ok(connection)) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let connection = Arc::new(connection);
                *slot = Slot::Ready {
                    connection: Arc::clone(&connection),
                    generation,
                };
                self.set_status(ConnectionStatus::Ready);
                info!(generation, "Connected to {}", self.connector.describe());
                Ok(ConnectionLease {
                    connection,
                    generation,
                })
            }
            Ok(Err(e)) => {
                *slot = Slot::Empty;
                self.set_status(ConnectionStatus::Invalid);
                warn!("Failed to connect to {}: {}", self.connector.describe(), e);
                Err(match e {
                    WarehouseError::ConnectionError(_) | WarehouseError::TimeoutError { .. } => e,
                    other => WarehouseError::ConnectionError(other.to_string()),
                })
            }
            Err(_) => {
                *slot = Slot::Empty;
                self.set_status(ConnectionStatus::Invalid);
                warn!(
                    "Connecting to {} timed out after {:?}",
                    self.connector.describe(),
                    self.connect_timeout
                );
                Err(WarehouseError::timeout(
                    self.connect_timeout,
                    format!("connecting to {}", self.connector.describe()),
                ))
            }
        }
    }

    /// Mark the connection of `generation` invalid
    ///
    /// Returns `false` when that connection was already replaced, so a late
    /// failure report never tears down a newer, healthy connection.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Ready {
                generation: current,
                ..
            } if *current == generation => {
                *slot = Slot::Empty;
                self.set_status(ConnectionStatus::Invalid);
                warn!(generation, "Invalidated connection to {}", self.connector.describe());
                true
            }
            _ => {
                debug!(generation, "Ignoring invalidation of a stale connection generation");
                false
            }
        }
    }

    /// Invalidate whatever connection is held
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Ready { generation, .. } = &*slot {
            info!(generation = *generation, "Resetting connection to {}", self.connector.describe());
            *slot = Slot::Empty;
            self.set_status(ConnectionStatus::Invalid);
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Number of connections established so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }
}
