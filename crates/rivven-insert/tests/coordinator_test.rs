//! Tests for commit policies against the in-memory database

use rivven_insert::prelude::*;
use rivven_insert::testing::{Fault, MockCall, MockDatabase};

async fn open(db: &MockDatabase) -> Box<dyn Connection> {
    db.factory()
        .connect(&ConnectionConfig::default())
        .await
        .unwrap()
}

fn coordinator(policy: CommitPolicy) -> TransactionCoordinator {
    TransactionCoordinator::new(QueryBuilder::new("t").unwrap(), policy)
}

fn rows(n: i64) -> Vec<Record> {
    (1..=n).map(|i| Record::new().with("a", i)).collect()
}

// ==================== PerBatch Tests ====================

#[tokio::test]
async fn test_per_batch_commits_once() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::PerBatch)
        .process(conn.as_ref(), &rows(3))
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.committed, 3);
    assert_eq!(outcome.commits, 1);
    assert_eq!(db.begin_count(), 1);
    assert_eq!(db.execute_count(), 3);
    assert_eq!(db.commit_count(), 1);
    assert_eq!(db.committed().len(), 3);
}

#[tokio::test]
async fn test_per_batch_invalid_record_rolls_back() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let batch = vec![
        Record::new().with("a", 1_i64),
        Record::new().with("bad column", 2_i64),
        Record::new().with("a", 3_i64),
    ];
    let outcome = coordinator(CommitPolicy::PerBatch)
        .process(conn.as_ref(), &batch)
        .await
        .unwrap();

    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
    // Third record never attempted
    assert_eq!(db.execute_count(), 1);
    assert!(db.committed().is_empty());

    assert!(outcome.rolled_back);
    assert_eq!(outcome.committed, 0);
    assert_eq!(outcome.records_failed(), 3);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, Some(1));
    assert!(matches!(outcome.failed[0].error, Error::InvalidIdentifier { .. }));
}

#[tokio::test]
async fn test_per_batch_execution_failure_rolls_back() {
    let db = MockDatabase::new();
    db.fail_execute_at(1, Fault::Constraint);
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::PerBatch)
        .process(conn.as_ref(), &rows(3))
        .await
        .unwrap();

    assert_eq!(
        db.calls(),
        vec![
            MockCall::Connect,
            MockCall::Begin,
            MockCall::Execute {
                sql: "INSERT INTO t (a) VALUES ($1)".into(),
                params: vec![Value::Int64(1)],
            },
            MockCall::Execute {
                sql: "INSERT INTO t (a) VALUES ($1)".into(),
                params: vec![Value::Int64(2)],
            },
            MockCall::Rollback,
        ]
    );
    assert!(db.committed().is_empty());
    assert!(matches!(outcome.failed[0].error, Error::Constraint { .. }));
}

#[tokio::test]
async fn test_per_batch_connection_lost_propagates() {
    let db = MockDatabase::new();
    db.fail_execute_at(0, Fault::ConnectionLost);
    let conn = open(&db).await;

    let err = coordinator(CommitPolicy::PerBatch)
        .process(conn.as_ref(), &rows(2))
        .await
        .unwrap_err();

    assert!(err.is_connection_lost());
    assert_eq!(db.rollback_count(), 0);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test]
async fn test_per_batch_commit_failure_reported() {
    let db = MockDatabase::new();
    db.fail_next_commits(1, Fault::Execution);
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::PerBatch)
        .process(conn.as_ref(), &rows(2))
        .await
        .unwrap();

    assert_eq!(outcome.committed, 0);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, None);
    assert!(db.committed().is_empty());
}

// ==================== PerRecord Tests ====================

#[tokio::test]
async fn test_per_record_commits_each_record() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::PerRecord)
        .process(conn.as_ref(), &rows(2))
        .await
        .unwrap();

    assert_eq!(db.commit_count(), 2);
    assert_eq!(db.begin_count(), 2);
    assert_eq!(outcome.commits, 2);
    assert_eq!(outcome.committed, 2);
}

#[tokio::test]
async fn test_per_record_failure_keeps_earlier_and_later_records() {
    let db = MockDatabase::new();
    db.fail_execute_at(1, Fault::Constraint);
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::PerRecord)
        .process(conn.as_ref(), &rows(3))
        .await
        .unwrap();

    assert_eq!(outcome.committed, 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, Some(1));
    assert!(outcome.rolled_back);

    let committed: Vec<Value> = db
        .committed()
        .into_iter()
        .flat_map(|s| s.params)
        .collect();
    assert_eq!(committed, vec![Value::Int64(1), Value::Int64(3)]);
    assert_eq!(db.rollback_count(), 1);
}

#[tokio::test]
async fn test_per_record_invalid_record_skipped_without_transaction() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let batch = vec![
        Record::new(),
        Record::new().with("a", 2_i64),
    ];
    let outcome = coordinator(CommitPolicy::PerRecord)
        .process(conn.as_ref(), &batch)
        .await
        .unwrap();

    assert_eq!(db.begin_count(), 1);
    assert_eq!(db.rollback_count(), 0);
    assert_eq!(outcome.committed, 1);
    assert!(matches!(outcome.failed[0].error, Error::EmptyRecord));
}

// ==================== BulkSingle Tests ====================

#[tokio::test]
async fn test_bulk_single_statement() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::BulkSingle)
        .process(conn.as_ref(), &rows(2))
        .await
        .unwrap();

    assert_eq!(db.executed_sql(), vec!["INSERT INTO t (a) VALUES ($1), ($2)"]);
    assert_eq!(db.commit_count(), 1);
    assert_eq!(outcome.committed, 2);

    let committed = db.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].params.len(), 2);
}

#[tokio::test]
async fn test_bulk_failure_fails_whole_batch() {
    let db = MockDatabase::new();
    db.fail_next_executes(1, Fault::Execution);
    let conn = open(&db).await;

    let outcome = coordinator(CommitPolicy::BulkSingle)
        .process(conn.as_ref(), &rows(4))
        .await
        .unwrap();

    assert!(outcome.rolled_back);
    assert_eq!(outcome.committed, 0);
    assert_eq!(outcome.records_failed(), 4);
    assert_eq!(db.rollback_count(), 1);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test]
async fn test_bulk_mismatch_rejected_before_begin() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    let batch = vec![
        Record::new().with("a", 1_i64),
        Record::new().with("a", 2_i64).with("b", 3_i64),
    ];
    let outcome = coordinator(CommitPolicy::BulkSingle)
        .process(conn.as_ref(), &batch)
        .await
        .unwrap();

    assert_eq!(db.begin_count(), 0);
    assert_eq!(db.execute_count(), 0);
    assert_eq!(outcome.failed[0].index, Some(1));
    assert!(matches!(
        outcome.failed[0].error,
        Error::MismatchedColumns { index: 1 }
    ));
}

// ==================== Edge Cases ====================

#[tokio::test]
async fn test_empty_batch_issues_nothing() {
    let db = MockDatabase::new();
    let conn = open(&db).await;

    for policy in [
        CommitPolicy::PerBatch,
        CommitPolicy::PerRecord,
        CommitPolicy::BulkSingle,
    ] {
        let outcome = coordinator(policy).process(conn.as_ref(), &[]).await.unwrap();
        assert_eq!(outcome.attempted, 0);
        assert!(outcome.is_success());
    }
    assert_eq!(db.calls(), vec![MockCall::Connect]);
}
