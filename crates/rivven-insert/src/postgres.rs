//! PostgreSQL backend for rivven-insert
//!
//! - [`PgConnectionFactory`]: opens sessions with `tokio-postgres`, optionally over
//!   rustls (`tls` feature)
//! - [`PgConnection`] / [`PgTransaction`]: explicit BEGIN / COMMIT / ROLLBACK
//! - Driver errors are classified: a closed client, a broken socket or SQLSTATE
//!   class 08 is a lost connection; class 23 is a constraint violation.
//!
//! Statements are prepared before execution so each [`Value`] can be coerced to
//! the parameter type the server inferred (a JSON integer bound to an `INT4`
//! column, for example).

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::Client;
use tracing::{debug, error, warn};

use crate::config::SslMode;
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, ErrorCategory, Result};
use crate::types::{Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// NULL that binds to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn int_param(n: i64, ty: &Type) -> BoxedParam {
    match *ty {
        Type::INT2 => match i16::try_from(n) {
            Ok(v) => Box::new(v),
            Err(_) => Box::new(n),
        },
        Type::INT4 => match i32::try_from(n) {
            Ok(v) => Box::new(v),
            Err(_) => Box::new(n),
        },
        Type::FLOAT4 => Box::new(n as f32),
        Type::FLOAT8 => Box::new(n as f64),
        Type::NUMERIC => Box::new(rust_decimal::Decimal::from(n)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => Box::new(n.to_string()),
        _ => Box::new(n),
    }
}

fn float_param(n: f64, ty: &Type) -> BoxedParam {
    match *ty {
        Type::FLOAT4 => Box::new(n as f32),
        Type::NUMERIC => match rust_decimal::Decimal::try_from(n) {
            Ok(d) => Box::new(d),
            Err(_) => Box::new(n),
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => Box::new(n.to_string()),
        _ => Box::new(n),
    }
}

fn string_param(s: &str, ty: &Type) -> BoxedParam {
    let parsed: Option<BoxedParam> = match *ty {
        Type::INT2 => s.parse::<i16>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::INT4 => s.parse::<i32>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::INT8 => s.parse::<i64>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::FLOAT4 => s.parse::<f32>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::FLOAT8 => s.parse::<f64>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::NUMERIC => s
            .parse::<rust_decimal::Decimal>()
            .ok()
            .map(|v| Box::new(v) as BoxedParam),
        Type::BOOL => Value::String(s.to_string())
            .as_bool()
            .map(|v| Box::new(v) as BoxedParam),
        Type::UUID => s.parse::<uuid::Uuid>().ok().map(|v| Box::new(v) as BoxedParam),
        Type::DATE => s
            .parse::<chrono::NaiveDate>()
            .ok()
            .map(|v| Box::new(v) as BoxedParam),
        Type::TIMESTAMP => s
            .parse::<chrono::NaiveDateTime>()
            .ok()
            .map(|v| Box::new(v) as BoxedParam),
        Type::TIMESTAMPTZ => s
            .parse::<chrono::DateTime<chrono::Utc>>()
            .ok()
            .map(|v| Box::new(v) as BoxedParam),
        Type::JSON | Type::JSONB => {
            Some(Box::new(serde_json::Value::String(s.to_string())) as BoxedParam)
        }
        _ => None,
    };
    // Unparseable input is bound as text; the server reports the type error.
    parsed.unwrap_or_else(|| Box::new(s.to_string()))
}

/// Convert a [`Value`] to a parameter of the server-inferred type `ty`
fn value_to_sql(value: &Value, ty: &Type) -> BoxedParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => int_param(i64::from(*n), ty),
        Value::Int32(n) => int_param(i64::from(*n), ty),
        Value::Int64(n) => int_param(*n, ty),
        Value::Float32(n) => float_param(f64::from(*n), ty),
        Value::Float64(n) => float_param(*n, ty),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => string_param(s, ty),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => match *ty {
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => Box::new(j.to_string()),
            _ => Box::new(j.clone()),
        },
    }
}

/// Convert a tokio-postgres row to a rivven Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| match *col.type_() {
            Type::INT2 => pg_row
                .try_get::<_, Option<i16>>(i)
                .ok()
                .flatten()
                .map(Value::Int16)
                .unwrap_or(Value::Null),
            Type::INT4 => pg_row
                .try_get::<_, Option<i32>>(i)
                .ok()
                .flatten()
                .map(Value::Int32)
                .unwrap_or(Value::Null),
            Type::INT8 => pg_row
                .try_get::<_, Option<i64>>(i)
                .ok()
                .flatten()
                .map(Value::Int64)
                .unwrap_or(Value::Null),
            Type::BOOL => pg_row
                .try_get::<_, Option<bool>>(i)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            _ => pg_row
                .try_get::<_, Option<String>>(i)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
        })
        .collect();

    Row::new(columns, values)
}

/// Whether an I/O error means the socket is gone, as opposed to a client-side
/// encode failure (`InvalidInput`) that would fail again on a fresh session
fn is_connection_io_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;

    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
            | ErrorKind::NotConnected
    )
}

fn is_connection_io_error(e: &tokio_postgres::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return is_connection_io_kind(io.kind());
        }
        source = err.source();
    }
    false
}

/// Map a SQLSTATE to the engine's error category.
///
/// Class 08 (connection exception) and 57P01..57P03 (server shutting down)
/// lose the session; class 23 is an integrity constraint violation.
fn classify_code(code: &str) -> ErrorCategory {
    if code.starts_with("08") || code.starts_with("57P") {
        ErrorCategory::Connection
    } else if code.starts_with("23") {
        ErrorCategory::Constraint
    } else {
        ErrorCategory::Execution
    }
}

/// Classify a driver error. `context` names the failed step, never the SQL.
fn classify(context: &str, e: tokio_postgres::Error) -> Error {
    if e.is_closed() || is_connection_io_error(&e) {
        return Error::connection_lost_with_source(context, e);
    }

    if let Some(db) = e.as_db_error() {
        let code = db.code().code();
        match classify_code(code) {
            ErrorCategory::Connection => {
                return Error::connection_lost(format!("{}: {}", context, db.message()));
            }
            ErrorCategory::Constraint => {
                return Error::Constraint {
                    constraint_name: db.constraint().unwrap_or("unknown").to_string(),
                    message: db.message().to_string(),
                };
            }
            _ => {
                let message = format!("{}: {} (SQLSTATE {})", context, db.message(), code);
                return Error::execution_with_source(message, e);
            }
        }
    }

    Error::execution_with_source(context, e)
}

async fn execute_on(client: &Client, sql: &str, params: &[Value]) -> Result<u64> {
    let stmt = client
        .prepare(sql)
        .await
        .map_err(|e| classify("prepare failed", e))?;

    if stmt.params().len() != params.len() {
        return Err(Error::execution(format!(
            "statement expects {} parameters, got {}",
            stmt.params().len(),
            params.len()
        )));
    }

    let boxed: Vec<BoxedParam> = params
        .iter()
        .zip(stmt.params())
        .map(|(v, ty)| value_to_sql(v, ty))
        .collect();
    let param_refs: Vec<&(dyn ToSql + Sync)> = boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect();

    client
        .execute(&stmt, &param_refs)
        .await
        .map_err(|e| classify("execute failed", e))
}

async fn transaction_control(client: &Client, command: &str) -> Result<()> {
    client.batch_execute(command).await.map_err(|e| {
        let err = classify(command, e);
        match err {
            Error::StatementExecution { message, source } => Error::Transaction { message, source },
            other => other,
        }
    })
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<Client>,
    closed: AtomicBool,
    task: tokio::task::JoinHandle<()>,
}

impl PgConnection {
    /// Wrap a client and the task driving its socket
    pub fn new(client: Client, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
            task,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection_lost("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;

        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| classify("prepare failed", e))?;
        let boxed: Vec<BoxedParam> = params
            .iter()
            .zip(stmt.params())
            .map(|(v, ty)| value_to_sql(v, ty))
            .collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = self
            .client
            .query(&stmt, &param_refs)
            .await
            .map_err(|e| classify("query failed", e))?;

        Ok(pg_rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        execute_on(&self.client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        transaction_control(&self.client, "BEGIN").await?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.task.abort();
        }
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        execute_on(&self.client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        transaction_control(&self.client, "COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        transaction_control(&self.client, "ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // The session is gone or about to be replaced; the server discards the transaction.
        if !self.finished.load(Ordering::Relaxed) {
            debug!("Transaction dropped without COMMIT or ROLLBACK");
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

impl PgConnectionFactory {
    fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .connect_timeout(config.connect_timeout);
        if let Some(password) = &config.password {
            pg.password(password.expose_secret());
        }
        if let Some(name) = &config.application_name {
            pg.application_name(name);
        }
        pg
    }

    fn spawn_driver<S, T>(connection: tokio_postgres::Connection<S, T>) -> tokio::task::JoinHandle<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        })
    }

    async fn connect_plain(pg: &tokio_postgres::Config) -> Result<PgConnection> {
        let (client, connection) = pg
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_lost_with_source("failed to connect", e))?;
        Ok(PgConnection::new(client, Self::spawn_driver(connection)))
    }

    #[cfg(feature = "tls")]
    async fn connect_tls(pg: &mut tokio_postgres::Config, mode: SslMode) -> Result<PgConnection> {
        use rustls::ClientConfig;
        use tokio_postgres_rustls::MakeRustlsConnect;

        let tls_config = match mode {
            SslMode::Prefer => {
                warn!("SslMode::Prefer does not verify TLS certificates; consider using VerifyFull");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(
                        danger::NoCertificateVerification::new(
                            rustls::crypto::ring::default_provider(),
                        ),
                    ))
                    .with_no_client_auth()
            }
            _ => {
                let mut root_store = rustls::RootCertStore::empty();
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        pg.ssl_mode(match mode {
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            _ => tokio_postgres::config::SslMode::Require,
        });

        let (client, connection) = pg
            .connect(MakeRustlsConnect::new(tls_config))
            .await
            .map_err(|e| Error::connection_lost_with_source("failed to connect with TLS", e))?;
        Ok(PgConnection::new(client, Self::spawn_driver(connection)))
    }

    #[cfg(not(feature = "tls"))]
    async fn connect_tls(pg: &mut tokio_postgres::Config, mode: SslMode) -> Result<PgConnection> {
        if mode == SslMode::Prefer {
            warn!("TLS support not compiled in (enable the `tls` feature); connecting without TLS");
            pg.ssl_mode(tokio_postgres::config::SslMode::Disable);
            return Self::connect_plain(pg).await;
        }
        Err(Error::config(format!(
            "ssl_mode '{}' requires the `tls` feature",
            mode
        )))
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg = Self::pg_config(config);

        let conn = if config.ssl_mode.uses_tls() {
            Self::connect_tls(&mut pg, config.ssl_mode).await?
        } else {
            pg.ssl_mode(tokio_postgres::config::SslMode::Disable);
            Self::connect_plain(&pg).await?
        };

        debug!(
            host = %config.host,
            port = config.port,
            ssl_mode = %config.ssl_mode,
            "PostgreSQL session established"
        );
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// Certificate verifier for `SslMode::Prefer`, which encrypts without verifying
#[cfg(feature = "tls")]
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification(rustls::crypto::CryptoProvider);

    impl NoCertificateVerification {
        pub fn new(provider: rustls::crypto::CryptoProvider) -> Self {
            Self(provider)
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
