//! The insert engine
//!
//! Composes the pipeline: serializer gate → retry controller → coordinator →
//! query builder → connection.
//!
//! ```rust,ignore
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use rivven_insert::prelude::*;
//! use rivven_insert::postgres::PgConnectionFactory;
//!
//! let config = EngineConfig::from_yaml(&std::fs::read_to_string("insert.yaml")?)?;
//! let engine = Engine::configure(config, Arc::new(PgConnectionFactory)).await?;
//!
//! let outcome = engine
//!     .process_batch(vec![Record::new().with("id", 1_i64).with("name", "alice")])
//!     .await?;
//! assert!(outcome.is_success());
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionFactory, ConnectionStatus};
use crate::coordinator::{
    AtomicInsertStats, CommitOutcome, CommitPolicy, InsertStats, TransactionCoordinator,
};
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::Result;
use crate::query::QueryBuilder;
use crate::retry::{with_retry, BatchOperation, ConnectionSlot, RetryPolicy};
use crate::schema::load_columns;
use crate::serializer::{BatchSerializer, GateGuard};
use crate::types::{Batch, Record};

struct InsertBatch<'a> {
    coordinator: &'a TransactionCoordinator,
    batch: &'a [Record],
    // Records committed by the latest attempt
    committed: AtomicUsize,
}

#[async_trait]
impl<'a> BatchOperation for InsertBatch<'a> {
    type Output = CommitOutcome;

    async fn run(&self, conn: &dyn Connection) -> Result<CommitOutcome> {
        self.committed.store(0, Ordering::Relaxed);
        self.coordinator
            .process_tracked(conn, self.batch, &self.committed)
            .await
    }
}

/// Transactional batch-insert engine for one table
pub struct Engine {
    config: EngineConfig,
    coordinator: TransactionCoordinator,
    retry: RetryPolicy,
    serializer: BatchSerializer<ConnectionSlot>,
    stats: AtomicInsertStats,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("table", &self.config.table)
            .field("policy", &self.coordinator.policy())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Engine {
    /// Validate `config`, connect, and load the table's column set.
    ///
    /// Identifier and settings errors are reported before the factory is
    /// called.
    pub async fn configure(config: EngineConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate_all()?;

        let mut slot = ConnectionSlot::new(factory, config.connection_config());
        let dialect: Arc<dyn SqlDialect> = Arc::from(dialect_for(slot.database_type()));

        let mut builder = QueryBuilder::new(config.table.as_str())?
            .with_schema(config.schema.as_str())?
            .with_dialect(Arc::clone(&dialect));

        let conn = slot.connect().await?;
        if config.introspect_schema {
            let columns = load_columns(conn, dialect.as_ref(), &config.schema, &config.table).await?;
            builder = builder.with_columns(columns);
        }

        let policy = config.effective_policy();
        let retry = RetryPolicy::fixed(config.max_retry_attempts, config.retry_backoff());

        info!(
            table = %builder.qualified_table(),
            dialect = dialect.name(),
            policy = %policy,
            columns = builder.columns().len(),
            max_attempts = retry.max_attempts,
            "Insert engine configured"
        );

        Ok(Self {
            serializer: BatchSerializer::new(slot, config.concurrency_limit),
            coordinator: TransactionCoordinator::new(builder, policy),
            retry,
            config,
            stats: AtomicInsertStats::default(),
        })
    }

    /// Write a batch, waiting for admission if the engine is saturated
    pub async fn process_batch(&self, batch: Batch) -> Result<CommitOutcome> {
        let mut gate = self.serializer.acquire().await?;
        self.run(&mut gate, &batch).await
    }

    /// Write a batch, failing with `Backpressure` instead of waiting for admission
    pub async fn try_process_batch(&self, batch: Batch) -> Result<CommitOutcome> {
        let mut gate = self.serializer.try_acquire().await?;
        self.run(&mut gate, &batch).await
    }

    async fn run(
        &self,
        gate: &mut GateGuard<'_, ConnectionSlot>,
        batch: &[Record],
    ) -> Result<CommitOutcome> {
        let slot: &mut ConnectionSlot = gate;
        let connects_before = slot.connect_count();

        let op = InsertBatch {
            coordinator: &self.coordinator,
            batch,
            committed: AtomicUsize::new(0),
        };
        let result = with_retry(slot, &op, &self.retry).await;

        for _ in connects_before..slot.connect_count() {
            self.stats.record_reconnect();
        }

        match &result {
            Ok(outcome) => self.stats.record_outcome(outcome),
            Err(e) => {
                let committed = op.committed.load(Ordering::Relaxed);
                error!(
                    table = %self.config.table,
                    records = batch.len(),
                    committed,
                    error = %e,
                    "Batch failed"
                );
                self.stats
                    .record_batch_error(batch.len() as u64, committed as u64);
            }
        }
        result
    }

    /// Replace the current session with a new one
    pub async fn reconnect(&self) -> Result<()> {
        let mut gate = self.serializer.acquire().await?;
        gate.connect().await?;
        self.stats.record_reconnect();
        Ok(())
    }

    /// Close the current session. The next batch reconnects.
    pub async fn disconnect(&self) -> Result<()> {
        let mut gate = self.serializer.acquire().await?;
        gate.disconnect().await
    }

    /// Whether a session is held and still alive.
    ///
    /// A dead session stays in place until the next batch replaces it.
    pub async fn connection_status(&self) -> ConnectionStatus {
        if self.serializer.lock_gate().await.is_alive().await {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::NotConnected
        }
    }

    /// Stop admitting batches, wait for the running one, and close the session
    pub async fn close(&self) -> Result<()> {
        self.serializer.close();
        let mut slot = self.serializer.lock_gate().await;
        slot.disconnect().await?;
        info!(table = %self.config.table, "Insert engine closed");
        Ok(())
    }

    /// Effective commit policy
    pub fn policy(&self) -> CommitPolicy {
        self.coordinator.policy()
    }

    /// Configuration the engine was built from
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics snapshot
    pub fn stats(&self) -> InsertStats {
        self.stats.snapshot()
    }
}
