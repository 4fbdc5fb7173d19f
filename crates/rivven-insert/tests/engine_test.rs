//! End-to-end engine tests: configure, retry, lifecycle, serialization

use rivven_insert::prelude::*;
use rivven_insert::testing::{Fault, MockCall, MockDatabase};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn users_db() -> MockDatabase {
    MockDatabase::new().with_columns(["id", "name"])
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::new("app", "users");
    config.retry_backoff_ms = 0;
    config
}

fn user(id: i64, name: &str) -> Record {
    Record::new().with("id", id).with("name", name)
}

async fn engine(db: &MockDatabase, config: EngineConfig) -> Engine {
    Engine::configure(config, db.factory()).await.unwrap()
}

// ==================== Configure Tests ====================

#[tokio::test]
async fn test_configure_connects_and_introspects() {
    init_tracing();
    let db = users_db();
    let engine = engine(&db, config()).await;

    assert_eq!(db.connect_count(), 1);
    assert!(matches!(db.calls()[1], MockCall::Query { .. }));
    assert_eq!(engine.connection_status().await, ConnectionStatus::Connected);
    assert_eq!(engine.policy(), CommitPolicy::PerBatch);
}

#[tokio::test]
async fn test_configure_bad_table_fails_before_connect() {
    let db = users_db();
    let mut config = config();
    config.table = "1bad".into();

    let err = Engine::configure(config, db.factory()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier { ref name, .. } if name == "1bad"));
    assert_eq!(db.connect_count(), 0);
}

#[tokio::test]
async fn test_configure_bulk_with_per_record_rejected() {
    let db = users_db();
    let mut config = config();
    config.bulk = true;
    config.commit_policy = CommitPolicy::PerRecord;

    let err = Engine::configure(config, db.factory()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(db.connect_count(), 0);
}

#[tokio::test]
async fn test_configure_unreachable_database() {
    let db = users_db();
    db.fail_next_connects(1);

    let err = Engine::configure(config(), db.factory()).await.unwrap_err();
    assert!(err.is_connection_lost());
}

#[tokio::test]
async fn test_configure_missing_table() {
    let db = MockDatabase::new();
    let err = Engine::configure(config(), db.factory()).await.unwrap_err();
    assert!(matches!(err, Error::TableNotFound { ref table } if table == "public.users"));
}

#[tokio::test]
async fn test_configure_introspection_failure() {
    let db = users_db();
    db.fail_queries(Fault::Execution);

    let err = Engine::configure(config(), db.factory()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("public.users"));
}

#[tokio::test]
async fn test_configure_without_introspection() {
    let db = MockDatabase::new();
    let mut config = config();
    config.introspect_schema = false;
    let engine = engine(&db, config).await;

    assert_eq!(db.calls(), vec![MockCall::Connect]);

    // Any valid identifier is accepted without a column set
    let outcome = engine
        .process_batch(vec![Record::new().with("anything", 1_i64)])
        .await
        .unwrap();
    assert!(outcome.is_success());
}

// ==================== Batch Tests ====================

#[tokio::test]
async fn test_process_batch_qualifies_table() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    let outcome = engine
        .process_batch(vec![user(1, "alice"), user(2, "bob")])
        .await
        .unwrap();

    assert_eq!(outcome.committed, 2);
    assert_eq!(
        db.executed_sql(),
        vec![
            "INSERT INTO public.users (id, name) VALUES ($1, $2)",
            "INSERT INTO public.users (id, name) VALUES ($1, $2)",
        ]
    );
}

#[tokio::test]
async fn test_unknown_column_fails_batch() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    let outcome = engine
        .process_batch(vec![user(1, "alice"), Record::new().with("email", "a@b")])
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert!(matches!(outcome.failed[0].error, Error::UnknownColumn { .. }));
    assert_eq!(db.rollback_count(), 1);
    assert!(db.committed().is_empty());
}

#[tokio::test]
async fn test_bulk_flag_uses_single_statement() {
    let db = users_db();
    let mut config = config();
    config.bulk = true;
    let engine = engine(&db, config).await;
    assert_eq!(engine.policy(), CommitPolicy::BulkSingle);

    engine
        .process_batch(vec![user(1, "a"), user(2, "b")])
        .await
        .unwrap();

    assert_eq!(
        db.executed_sql(),
        vec!["INSERT INTO public.users (id, name) VALUES ($1, $2), ($3, $4)"]
    );
    assert_eq!(db.commit_count(), 1);
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_connection_lost_then_recovered() {
    init_tracing();
    let db = users_db();
    let engine = engine(&db, config()).await;
    db.fail_next_executes(1, Fault::ConnectionLost);

    let outcome = engine
        .process_batch(vec![user(1, "alice")])
        .await
        .unwrap();

    assert_eq!(db.connect_count(), 2);
    assert_eq!(outcome.committed, 1);
    assert_eq!(db.committed().len(), 1);
    assert_eq!(engine.stats().reconnects, 1);
    assert_eq!(engine.connection_status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_single_attempt_never_reconnects() {
    let db = users_db();
    let mut config = config();
    config.max_retry_attempts = 1;
    let engine = engine(&db, config).await;
    db.fail_all_executes(Fault::ConnectionLost);

    let err = engine
        .process_batch(vec![user(1, "alice")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RetryExhausted { attempts: 1, .. }));
    assert_eq!(db.connect_count(), 1);
    assert!(db.committed().is_empty());
    assert_eq!(engine.stats().batches_failed, 1);
}

#[tokio::test]
async fn test_retry_exhausted_keeps_engine_alive() {
    let db = users_db();
    let engine = engine(&db, config()).await;
    db.fail_next_executes(3, Fault::ConnectionLost);

    let err = engine
        .process_batch(vec![user(1, "alice")])
        .await
        .unwrap_err();
    match err {
        Error::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.is_connection_lost());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.connect_count(), 3);
    assert_eq!(
        engine.connection_status().await,
        ConnectionStatus::NotConnected
    );

    // Next batch reconnects on its own
    let outcome = engine
        .process_batch(vec![user(2, "bob")])
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(db.connect_count(), 4);
}

#[tokio::test]
async fn test_non_connection_errors_not_retried() {
    let db = users_db();
    let engine = engine(&db, config()).await;
    db.fail_next_executes(1, Fault::Execution);

    let outcome = engine
        .process_batch(vec![user(1, "alice")])
        .await
        .unwrap();

    assert!(outcome.rolled_back);
    assert_eq!(db.connect_count(), 1);
}

#[tokio::test]
async fn test_per_record_retry_reruns_batch() {
    let db = users_db();
    let mut config = config();
    config.commit_policy = CommitPolicy::PerRecord;
    let engine = engine(&db, config).await;
    db.fail_execute_at(1, Fault::ConnectionLost);

    let outcome = engine
        .process_batch(vec![user(1, "a"), user(2, "b")])
        .await
        .unwrap();

    // Record 0 was committed before the loss and again on the re-run
    assert_eq!(outcome.committed, 2);
    assert_eq!(db.committed().len(), 3);
}

#[tokio::test]
async fn test_failed_batch_counts_committed_records() {
    let db = users_db();
    let mut config = config();
    config.commit_policy = CommitPolicy::PerRecord;
    config.max_retry_attempts = 1;
    let engine = engine(&db, config).await;
    db.fail_execute_at(1, Fault::ConnectionLost);

    let err = engine
        .process_batch(vec![user(1, "a"), user(2, "b"), user(3, "c")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetryExhausted { .. }));

    let stats = engine.stats();
    assert_eq!(db.committed().len(), 1);
    assert_eq!(stats.records_written, 1);
    assert_eq!(stats.records_failed, 2);
    assert_eq!(stats.batches_failed, 1);
}

// ==================== Lifecycle Tests ====================

#[tokio::test]
async fn test_status_reports_dead_session() {
    let db = users_db();
    let engine = engine(&db, config()).await;
    assert_eq!(engine.connection_status().await, ConnectionStatus::Connected);

    db.drop_sessions();
    assert_eq!(
        engine.connection_status().await,
        ConnectionStatus::NotConnected
    );

    // The next batch notices the dead session and replaces it
    let outcome = engine.process_batch(vec![user(1, "a")]).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(db.connect_count(), 2);
    assert_eq!(engine.connection_status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_disconnect_then_lazy_reconnect() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    engine.disconnect().await.unwrap();
    assert_eq!(
        engine.connection_status().await,
        ConnectionStatus::NotConnected
    );
    assert_eq!(db.close_count(), 1);

    // Idempotent
    engine.disconnect().await.unwrap();
    assert_eq!(db.close_count(), 1);

    engine.process_batch(vec![user(1, "a")]).await.unwrap();
    assert_eq!(db.connect_count(), 2);
    assert_eq!(engine.connection_status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    engine.reconnect().await.unwrap();

    assert_eq!(db.connect_count(), 2);
    assert_eq!(db.close_count(), 1);
    assert_eq!(engine.stats().reconnects, 1);
}

#[tokio::test]
async fn test_close_rejects_new_batches() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    engine.close().await.unwrap();
    assert_eq!(db.close_count(), 1);

    let err = engine.process_batch(vec![user(1, "a")]).await.unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert!(matches!(
        engine.try_process_batch(vec![user(1, "a")]).await,
        Err(Error::Closed)
    ));
}

// ==================== Serialization Tests ====================

#[tokio::test]
async fn test_concurrent_batches_never_interleave() {
    let db = users_db();
    let engine = Arc::new(engine(&db, config()).await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .process_batch(vec![user(i * 2, "a"), user(i * 2 + 1, "b")])
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_success());
    }

    // Skip connect + introspection query, then every batch is one closed unit
    let calls = db.calls().split_off(2);
    assert_eq!(calls.len(), 16 * 4);
    for unit in calls.chunks(4) {
        assert_eq!(unit[0], MockCall::Begin);
        assert!(matches!(unit[1], MockCall::Execute { .. }));
        assert!(matches!(unit[2], MockCall::Execute { .. }));
        assert_eq!(unit[3], MockCall::Commit);
    }

    let stats = engine.stats();
    assert_eq!(stats.records_written, 32);
    assert_eq!(stats.batches_committed, 16);
    assert_eq!(stats.commits, 16);
}

#[tokio::test]
async fn test_stats_track_outcomes() {
    let db = users_db();
    let engine = engine(&db, config()).await;

    engine.process_batch(vec![user(1, "a")]).await.unwrap();
    db.fail_next_executes(1, Fault::Constraint);
    engine
        .process_batch(vec![user(2, "b"), user(3, "c")])
        .await
        .unwrap();

    let stats = engine.stats();
    assert_eq!(stats.records_written, 1);
    assert_eq!(stats.records_failed, 2);
    assert_eq!(stats.batches_committed, 1);
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.rollbacks, 1);
}
