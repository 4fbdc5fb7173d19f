//! Transaction coordinator
//!
//! Runs one batch against one connection under a [`CommitPolicy`]:
//!
//! - [`CommitPolicy::PerBatch`]: every record in one transaction. The first
//!   failure (validation or execution) rolls back and stops the batch.
//! - [`CommitPolicy::PerRecord`]: one transaction per record. A failed record
//!   is rolled back alone; later records are still attempted.
//! - [`CommitPolicy::BulkSingle`]: one multi-row INSERT, one commit.
//!
//! Record-level failures are collected into the [`CommitOutcome`]. A lost
//! connection is returned as `Err` so the retry controller can reconnect.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::connection::{Connection, Transaction};
use crate::error::{Error, Result};
use crate::query::{check_uniform, QueryBuilder};
use crate::types::Record;

/// Commit granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// All records of a batch commit together or not at all
    #[default]
    PerBatch,
    /// Each record commits on its own
    PerRecord,
    /// The batch is written as one multi-row INSERT
    BulkSingle,
}

impl std::fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerBatch => write!(f, "per_batch"),
            Self::PerRecord => write!(f, "per_record"),
            Self::BulkSingle => write!(f, "bulk_single"),
        }
    }
}

/// A record (or the whole batch) that did not make it into the table
#[derive(Debug)]
pub struct FailedRecord {
    /// Position in the batch; `None` when the failure is not tied to one record
    pub index: Option<usize>,
    /// Why it failed
    pub error: Error,
}

/// Result of processing one batch
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Records in the batch
    pub attempted: usize,
    /// Records durably committed
    pub committed: usize,
    /// Failures, in the order they happened
    pub failed: Vec<FailedRecord>,
    /// Whether a rollback was issued
    pub rolled_back: bool,
    /// Number of COMMITs issued
    pub commits: u32,
    /// Wall time spent in the coordinator
    pub duration: Duration,
}

impl CommitOutcome {
    fn new(attempted: usize) -> Self {
        Self {
            attempted,
            ..Default::default()
        }
    }

    /// Check if every record was committed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.committed == self.attempted
    }

    /// Records of the batch that were not committed
    pub fn records_failed(&self) -> usize {
        self.attempted - self.committed
    }

    fn fail(&mut self, index: Option<usize>, error: Error) {
        self.failed.push(FailedRecord { index, error });
    }
}

/// Insert statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct InsertStats {
    /// Total records committed
    pub records_written: u64,
    /// Total records not committed
    pub records_failed: u64,
    /// Batches where every record was committed
    pub batches_committed: u64,
    /// Batches with at least one failure
    pub batches_failed: u64,
    /// COMMITs issued
    pub commits: u64,
    /// ROLLBACKs issued
    pub rollbacks: u64,
    /// Connections replaced after a connection loss
    pub reconnects: u64,
    /// Total time spent writing (milliseconds)
    pub total_write_time_ms: u64,
}

/// Atomic insert statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicInsertStats {
    pub records_written: AtomicU64,
    pub records_failed: AtomicU64,
    pub batches_committed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub reconnects: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicInsertStats {
    /// Account for a processed batch
    pub fn record_outcome(&self, outcome: &CommitOutcome) {
        self.records_written
            .fetch_add(outcome.committed as u64, Ordering::Relaxed);
        self.records_failed
            .fetch_add(outcome.records_failed() as u64, Ordering::Relaxed);
        if outcome.is_success() {
            self.batches_committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.commits
            .fetch_add(u64::from(outcome.commits), Ordering::Relaxed);
        if outcome.rolled_back {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
        self.total_write_time_ms
            .fetch_add(outcome.duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Account for a batch that ended in an error after `committed` of its
    /// `attempted` records were durably written
    pub fn record_batch_error(&self, attempted: u64, committed: u64) {
        let committed = committed.min(attempted);
        self.records_written.fetch_add(committed, Ordering::Relaxed);
        self.records_failed
            .fetch_add(attempted - committed, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a replaced connection
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> InsertStats {
        InsertStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            total_write_time_ms: self.total_write_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Applies a [`CommitPolicy`] to batches
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    builder: QueryBuilder,
    policy: CommitPolicy,
}

impl TransactionCoordinator {
    /// Create a coordinator
    pub fn new(builder: QueryBuilder, policy: CommitPolicy) -> Self {
        Self { builder, policy }
    }

    /// Commit policy in use
    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Write `batch` through `conn`.
    ///
    /// An empty batch issues no statements.
    pub async fn process(&self, conn: &dyn Connection, batch: &[Record]) -> Result<CommitOutcome> {
        self.process_tracked(conn, batch, &AtomicUsize::new(0)).await
    }

    /// Like [`process`](Self::process), also adding every committed record to
    /// `progress` as soon as its COMMIT succeeds. The count stays valid when
    /// the batch ends in `Err`.
    pub async fn process_tracked(
        &self,
        conn: &dyn Connection,
        batch: &[Record],
        progress: &AtomicUsize,
    ) -> Result<CommitOutcome> {
        let start = Instant::now();
        let mut outcome = CommitOutcome::new(batch.len());

        if !batch.is_empty() {
            match self.policy {
                CommitPolicy::PerBatch => {
                    self.process_per_batch(conn, batch, &mut outcome, progress)
                        .await?
                }
                CommitPolicy::PerRecord => {
                    self.process_per_record(conn, batch, &mut outcome, progress)
                        .await?
                }
                CommitPolicy::BulkSingle => {
                    self.process_bulk(conn, batch, &mut outcome, progress)
                        .await?
                }
            }
        }

        outcome.duration = start.elapsed();
        debug!(
            table = %self.builder.table(),
            policy = %self.policy,
            committed = outcome.committed,
            failed = outcome.records_failed(),
            "Batch processed"
        );
        Ok(outcome)
    }

    async fn process_per_batch(
        &self,
        conn: &dyn Connection,
        batch: &[Record],
        outcome: &mut CommitOutcome,
        progress: &AtomicUsize,
    ) -> Result<()> {
        let tx = conn.begin().await?;
        trace!(records = batch.len(), "Transaction started for batch");

        for (index, record) in batch.iter().enumerate() {
            let result = match self.builder.build_insert(record) {
                Ok(stmt) => tx.execute(&stmt.sql, &stmt.params).await.map(|_| ()),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                if e.is_connection_lost() {
                    return Err(e);
                }
                warn!(
                    table = %self.builder.table(),
                    index,
                    error = %e,
                    "Record failed, rolling back batch"
                );
                outcome.fail(Some(index), e);
                rollback(tx, outcome).await;
                return Ok(());
            }
        }

        commit(tx, outcome, progress, batch.len(), None).await
    }

    async fn process_per_record(
        &self,
        conn: &dyn Connection,
        batch: &[Record],
        outcome: &mut CommitOutcome,
        progress: &AtomicUsize,
    ) -> Result<()> {
        for (index, record) in batch.iter().enumerate() {
            let stmt = match self.builder.build_insert(record) {
                Ok(stmt) => stmt,
                Err(e) => {
                    warn!(table = %self.builder.table(), index, error = %e, "Record rejected");
                    outcome.fail(Some(index), e);
                    continue;
                }
            };

            let tx = conn.begin().await?;
            if let Err(e) = tx.execute(&stmt.sql, &stmt.params).await {
                if e.is_connection_lost() {
                    return Err(e);
                }
                warn!(table = %self.builder.table(), index, error = %e, "Record failed");
                outcome.fail(Some(index), e);
                rollback(tx, outcome).await;
                continue;
            }

            commit(tx, outcome, progress, 1, Some(index)).await?;
        }
        Ok(())
    }

    async fn process_bulk(
        &self,
        conn: &dyn Connection,
        batch: &[Record],
        outcome: &mut CommitOutcome,
        progress: &AtomicUsize,
    ) -> Result<()> {
        if let Err(e) = check_uniform(batch) {
            let index = match &e {
                Error::MismatchedColumns { index } => Some(*index),
                _ => None,
            };
            warn!(table = %self.builder.table(), error = %e, "Bulk batch rejected");
            outcome.fail(index, e);
            return Ok(());
        }

        let stmt = match self.builder.build_bulk_insert(batch) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(table = %self.builder.table(), error = %e, "Bulk batch rejected");
                outcome.fail(None, e);
                return Ok(());
            }
        };

        let tx = conn.begin().await?;
        if let Err(e) = tx.execute(&stmt.sql, &stmt.params).await {
            if e.is_connection_lost() {
                return Err(e);
            }
            warn!(
                table = %self.builder.table(),
                records = batch.len(),
                error = %e,
                "Bulk insert failed, rolling back"
            );
            outcome.fail(None, e);
            rollback(tx, outcome).await;
            return Ok(());
        }

        commit(tx, outcome, progress, batch.len(), None).await
    }
}

async fn rollback(tx: Box<dyn Transaction>, outcome: &mut CommitOutcome) {
    outcome.rolled_back = true;
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "Rollback failed");
    }
}

async fn commit(
    tx: Box<dyn Transaction>,
    outcome: &mut CommitOutcome,
    progress: &AtomicUsize,
    records: usize,
    index: Option<usize>,
) -> Result<()> {
    match tx.commit().await {
        Ok(()) => {
            outcome.commits += 1;
            outcome.committed += records;
            progress.fetch_add(records, Ordering::Relaxed);
            trace!(records, "Transaction committed");
            Ok(())
        }
        Err(e) if e.is_connection_lost() => Err(e),
        Err(e) => {
            error!(error = %e, records, "Commit failed");
            outcome.fail(index, e);
            Ok(())
        }
    }
}
