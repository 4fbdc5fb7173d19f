//! Error types for rivven-insert
//!
//! Errors are classified so the engine can decide what to do with them:
//! - Connection-lost errors trigger the reconnect-and-retry cycle
//! - Validation errors reject a single record (or a whole batch in commit-all mode)
//! - Execution and constraint errors trigger a rollback per commit policy
//!
//! Messages carry table and column identifiers only. SQL text, bound values and
//! credentials are never part of an error's `Display` output.

use std::fmt;
use thiserror::Error;

/// Result type for rivven-insert operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identifier, column or shape validation (never retried)
    Validation,
    /// Driver-reported statement failure
    Execution,
    /// Constraint violation (not retriable)
    Constraint,
    /// Session is gone (retriable after reconnect)
    Connection,
    /// BEGIN/COMMIT/ROLLBACK failure
    Transaction,
    /// Startup or settings error
    Configuration,
    /// Admission limit reached
    Backpressure,
    /// All reconnect attempts used up
    RetryExhausted,
}

impl ErrorCategory {
    /// Whether errors in this category are handled by reconnecting
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection)
    }
}

/// Main error type for rivven-insert
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Name is not a valid unquoted SQL identifier
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    /// Column is not part of the introspected column set
    #[error("unknown column '{column}' for table {table}")]
    UnknownColumn { table: String, column: String },

    /// Record has no columns
    #[error("record has no columns")]
    EmptyRecord,

    /// Batch has no records
    #[error("batch has no records")]
    EmptyBatch,

    /// Bulk batch record does not share the first record's columns
    #[error("record {index} does not match the column layout of the first record")]
    MismatchedColumns { index: usize },

    /// Driver failed to execute a built statement
    #[error("statement execution failed: {message}")]
    StatementExecution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Constraint violation (PK, FK, unique, check)
    #[error("constraint violation: {constraint_name} - {message}")]
    Constraint {
        constraint_name: String,
        message: String,
    },

    /// Session handle is no longer usable
    #[error("connection lost: {message}")]
    ConnectionLost {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every reconnect attempt failed
    #[error("retry exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Target table does not exist or has no visible columns
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Admission queue is full
    #[error("engine busy: {limit} callers already queued")]
    Backpressure { limit: usize },

    /// Engine was closed
    #[error("engine is closed")]
    Closed,
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidIdentifier { .. }
            | Self::UnknownColumn { .. }
            | Self::EmptyRecord
            | Self::EmptyBatch
            | Self::MismatchedColumns { .. } => ErrorCategory::Validation,
            Self::StatementExecution { .. } => ErrorCategory::Execution,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::ConnectionLost { .. } => ErrorCategory::Connection,
            Self::RetryExhausted { .. } => ErrorCategory::RetryExhausted,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Configuration { .. } | Self::TableNotFound { .. } | Self::Closed => {
                ErrorCategory::Configuration
            }
            Self::Backpressure { .. } => ErrorCategory::Backpressure,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether the session behind the connection is gone
    #[inline]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// Whether this error rejects input rather than reporting a database failure
    #[inline]
    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a connection-lost error
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection-lost error with source
    pub fn connection_lost_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionLost {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a statement execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::StatementExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a statement execution error with source
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StatementExecution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap the last attempt's error once the retry budget is spent
    pub fn retry_exhausted(attempts: u32, last: Error) -> Self {
        Self::RetryExhausted {
            attempts,
            last: Box::new(last),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Execution => write!(f, "execution"),
            Self::Constraint => write!(f, "constraint"),
            Self::Connection => write!(f, "connection"),
            Self::Transaction => write!(f, "transaction"),
            Self::Configuration => write!(f, "configuration"),
            Self::Backpressure => write!(f, "backpressure"),
            Self::RetryExhausted => write!(f, "retry_exhausted"),
        }
    }
}
