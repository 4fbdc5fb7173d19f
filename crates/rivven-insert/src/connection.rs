//! Connection traits for rivven-insert
//!
//! Core abstractions the engine writes through:
//! - Connection: one database session, exclusively owned by the engine
//! - Transaction: explicit BEGIN / COMMIT / ROLLBACK scope on that session
//! - ConnectionFactory: opens a fresh session from a [`ConnectionConfig`]
//!
//! A session may break between any two operations. Backends report that as
//! [`Error::ConnectionLost`](crate::error::Error::ConnectionLost) so the retry
//! controller can replace the handle.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{SensitiveString, SslMode};
use crate::error::Result;
use crate::types::{Row, Value};

/// A connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement outside an explicit transaction, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Begin a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a statement inside the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Parameters for opening a session
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login user
    pub user: String,
    /// Login password
    pub password: Option<SensitiveString>,
    /// TLS negotiation mode
    pub ssl_mode: SslMode,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Application name (shown in pg_stat_activity, etc)
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            password: None,
            ssl_mode: SslMode::default(),
            connect_timeout: Duration::from_secs(10),
            application_name: Some("rivven-insert".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration for a host and database
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set login credentials
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Self {
        self.user = user.into();
        self.password = Some(password.into());
        self
    }

    /// Set TLS mode
    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// MySQL/MariaDB
    MySQL,
    /// Unknown/custom
    Unknown,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Whether the engine currently holds a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// A session handle is held
    Connected,
    /// No session (never connected, disconnected, or closed)
    NotConnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::NotConnected => write!(f, "not_connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("db.internal", "orders")
            .with_port(6432)
            .with_credentials("writer", "hunter2")
            .with_ssl_mode(SslMode::Require)
            .with_connect_timeout(Duration::from_secs(3))
            .with_application_name("ingest");

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.database, "orders");
        assert_eq!(config.port, 6432);
        assert_eq!(config.user, "writer");
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.application_name, Some("ingest".into()));
    }

    #[test]
    fn test_connection_config_debug_redacts_password() {
        let config = ConnectionConfig::new("localhost", "db").with_credentials("u", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(format!("{}", DatabaseType::PostgreSQL), "PostgreSQL");
        assert_eq!(format!("{}", DatabaseType::MySQL), "MySQL");
        assert_eq!(format!("{}", DatabaseType::Unknown), "Unknown");
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::NotConnected.to_string(), "not_connected");
    }
}
