//! Engine configuration
//!
//! [`EngineConfig`] is deserialized from YAML or JSON and validated once,
//! before the engine opens its first connection.
//!
//! ```yaml
//! host: db.internal
//! database: analytics
//! table: page_views
//! username: writer
//! password: ${PG_PASSWORD}
//! ssl_mode: verify-full
//! commit_policy: per_record
//! max_retry_attempts: 5
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::connection::ConnectionConfig;
use crate::coordinator::CommitPolicy;
use crate::error::{Error, Result};
use crate::security::validate_sql_identifier;

/// A string that holds sensitive data (passwords, tokens).
///
/// Redacted in `Debug`, `Display` and `Serialize` output.
///
/// ```
/// use rivven_insert::config::SensitiveString;
///
/// let secret = SensitiveString::new("hunter2");
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose_secret(), "hunter2");
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Only for handing the credential to the driver.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// TLS mode for the database session
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No TLS
    Disable,
    /// TLS without certificate verification
    #[default]
    Prefer,
    /// TLS, certificate verified against the webpki roots
    Require,
    /// Verify server certificate against CA
    VerifyCa,
    /// Verify server certificate and hostname
    VerifyFull,
}

impl SslMode {
    /// Whether the session must be wrapped in TLS
    #[inline]
    pub const fn uses_tls(self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

/// Configuration for the insert engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    /// Database host
    #[serde(default = "default_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    /// Database port (default: 5432)
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Database name
    #[validate(length(min = 1, max = 127))]
    pub database: String,

    /// Schema holding the target table (default: public)
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Target table; must be a plain SQL identifier
    pub table: String,

    /// Login user
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// TLS mode
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Commit granularity (default: one commit per batch)
    #[serde(default)]
    pub commit_policy: CommitPolicy,

    /// Write each batch as a single multi-row INSERT
    #[serde(default)]
    pub bulk: bool,

    /// Maximum number of callers admitted to wait for the write gate
    #[serde(default = "default_concurrency_limit")]
    #[validate(range(min = 1, max = 100000))]
    pub concurrency_limit: usize,

    /// Total attempts per batch, including the first (1 = never reconnect)
    #[serde(default = "default_max_retry_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub max_retry_attempts: u32,

    /// Pause before each reconnect, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    #[validate(range(max = 60000))]
    pub retry_backoff_ms: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub connect_timeout_secs: u64,

    /// Load the table's column set at startup and reject unknown columns
    #[serde(default = "default_true")]
    pub introspect_schema: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_concurrency_limit() -> usize {
    100
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: String::new(),
            schema: default_schema(),
            table: String::new(),
            username: String::new(),
            password: None,
            ssl_mode: SslMode::default(),
            commit_policy: CommitPolicy::default(),
            bulk: false,
            concurrency_limit: default_concurrency_limit(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout(),
            introspect_schema: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for `database.table` with defaults for everything else
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            ..Default::default()
        }
    }

    /// Parse from YAML
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| Error::config(format!("invalid YAML config: {}", e)))
    }

    /// Parse from JSON
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| Error::config(format!("invalid JSON config: {}", e)))
    }

    /// Validate everything the engine relies on.
    ///
    /// The table name is checked first so a bad name fails with
    /// [`Error::InvalidIdentifier`] regardless of other settings.
    pub fn validate_all(&self) -> Result<()> {
        validate_sql_identifier(&self.table)?;
        validate_sql_identifier(&self.schema)?;

        self.validate()
            .map_err(|e| Error::config(format!("invalid engine config: {}", e)))?;

        self.validate_policy()
    }

    /// Reject `bulk` combined with per-record commits
    pub fn validate_policy(&self) -> Result<()> {
        if self.bulk && self.commit_policy == CommitPolicy::PerRecord {
            return Err(Error::config(
                "'bulk' cannot be combined with commit_policy 'per_record'",
            ));
        }
        Ok(())
    }

    /// Commit policy after applying the `bulk` flag
    pub fn effective_policy(&self) -> CommitPolicy {
        if self.bulk {
            CommitPolicy::BulkSingle
        } else {
            self.commit_policy
        }
    }

    /// Pause before each reconnect
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Session parameters for the connection factory
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.username.clone(),
            password: self.password.clone(),
            ssl_mode: self.ssl_mode,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            application_name: Some("rivven-insert".into()),
        }
    }
}
