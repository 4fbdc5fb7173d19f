//! # rivven-insert
//!
//! Transactional batch-INSERT engine for the Rivven event streaming platform.
//!
//! The engine takes batches of column→value records and writes them into one
//! relational table over a single session, with a configurable commit policy,
//! automatic reconnect-and-retry on lost connections, and strict validation
//! of every identifier that ends up in SQL text.
//!
//! ## Features
//!
//! - **Commit policies**: one transaction per batch, one per record, or a
//!   single multi-row INSERT per batch
//! - **Reconnect and retry**: a lost session is replaced and the batch re-run
//! - **Serialized writes**: bounded admission, one batch on the wire at a time
//! - **Schema-aware**: unknown columns are rejected before any SQL is sent
//! - **Injection-safe**: identifiers are validated, values are always bound
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rivven_insert::prelude::*;
//! use rivven_insert::postgres::PgConnectionFactory;
//!
//! let config = EngineConfig::new("app", "users");
//! let engine = Engine::configure(config, Arc::new(PgConnectionFactory)).await?;
//!
//! let outcome = engine
//!     .process_batch(vec![
//!         Record::new().with("id", 1_i64).with("name", "alice"),
//!         Record::new().with("id", 2_i64).with("name", "bob"),
//!     ])
//!     .await?;
//! assert_eq!(outcome.committed, 2);
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend via tokio-postgres (default)
//! - `tls` - TLS for the PostgreSQL backend via rustls
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod query;
pub mod retry;
pub mod schema;
pub mod security;
pub mod serializer;
pub mod testing;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and record model
    pub use crate::types::{Batch, Record, Row, Value};

    // Configuration
    pub use crate::config::{EngineConfig, SensitiveString, SslMode};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, ConnectionStatus, DatabaseType,
        Transaction,
    };

    // Engine pipeline
    pub use crate::coordinator::{
        CommitOutcome, CommitPolicy, FailedRecord, InsertStats, TransactionCoordinator,
    };
    pub use crate::dialect::{dialect_for, GenericDialect, PostgresDialect, SqlDialect};
    pub use crate::engine::Engine;
    pub use crate::query::{InsertStatement, QueryBuilder};
    pub use crate::retry::RetryPolicy;
    pub use crate::schema::ColumnSet;
    pub use crate::security::validate_sql_identifier;
}

// Re-export commonly used items at crate root
pub use engine::Engine;
pub use error::{Error, Result};
pub use types::{Record, Value};
