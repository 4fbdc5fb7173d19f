//! Reconnect-and-retry controller
//!
//! Wraps a [`BatchOperation`] so that a lost connection is replaced and the
//! operation re-run from scratch. Only [`Error::ConnectionLost`] triggers a
//! retry; every other error is returned as-is. The in-flight transaction of a
//! lost session is forfeited: the server rolls it back when the session dies.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};

/// Retry budget for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` never reconnects.
    pub max_attempts: u32,
    /// Pause before each reconnect
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed pause between attempts
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no reconnect
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

/// Unit of work that can be re-run against a fresh connection
#[async_trait]
pub trait BatchOperation: Send + Sync {
    /// Value produced on success
    type Output: Send;

    /// Run once against `conn`
    async fn run(&self, conn: &dyn Connection) -> Result<Self::Output>;
}

/// The engine's single session handle and the means to replace it
pub struct ConnectionSlot {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    conn: Option<Box<dyn Connection>>,
    connects: u64,
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("config", &self.config)
            .field("connected", &self.conn.is_some())
            .field("connects", &self.connects)
            .finish()
    }
}

impl ConnectionSlot {
    /// Create an empty slot
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: ConnectionConfig) -> Self {
        Self {
            factory,
            config,
            conn: None,
            connects: 0,
        }
    }

    /// Database type of the factory
    pub fn database_type(&self) -> DatabaseType {
        self.factory.database_type()
    }

    /// Sessions opened so far
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    /// Current session, if any
    pub fn connection(&self) -> Option<&dyn Connection> {
        self.conn.as_deref()
    }

    /// Whether a session is held and still answers
    pub async fn is_alive(&self) -> bool {
        match self.connection() {
            Some(conn) => conn.is_valid().await,
            None => false,
        }
    }

    /// Open a new session, closing and replacing any existing one
    pub async fn connect(&mut self) -> Result<&dyn Connection> {
        self.discard().await;

        let conn = self.factory.connect(&self.config).await?;
        self.connects += 1;
        info!(
            host = %self.config.host,
            database = %self.config.database,
            connects = self.connects,
            "Connected"
        );
        Ok(&**self.conn.insert(conn))
    }

    /// Current session, opening one if the slot is empty
    pub async fn ensure_connected(&mut self) -> Result<&dyn Connection> {
        match self.conn {
            Some(ref conn) => Ok(&**conn),
            None => self.connect().await,
        }
    }

    /// Close and drop the current session. No-op when empty.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            info!(host = %self.config.host, "Disconnected");
        }
        Ok(())
    }

    /// Drop the current session, ignoring close errors
    async fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Closing stale connection failed");
            }
        }
    }
}

/// Run `op`, replacing the connection and starting over when it is lost.
///
/// Stops after `policy.max_attempts` attempts with [`Error::RetryExhausted`]
/// carrying the last connection error.
pub async fn with_retry<O: BatchOperation>(
    slot: &mut ConnectionSlot,
    op: &O,
    policy: &RetryPolicy,
) -> Result<O::Output> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match slot.ensure_connected().await {
            Ok(conn) => op.run(conn).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Operation succeeded after reconnect");
                }
                return Ok(value);
            }
            Err(e) if e.is_connection_lost() => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Connection lost, in-flight transaction forfeited"
                );
                slot.discard().await;

                if attempt >= max_attempts {
                    error!(attempts = attempt, error = %e, "Retry attempts exhausted");
                    return Err(Error::retry_exhausted(attempt, e));
                }

                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
