//! Tests for engine configuration loading and validation

use rivven_insert::prelude::*;
use std::time::Duration;

#[test]
fn test_yaml_config() {
    let yaml = r#"
host: db.internal
port: 6432
database: app
schema: events
table: page_views
username: writer
password: s3cret
ssl_mode: verify-full
commit_policy: per_record
concurrency_limit: 8
max_retry_attempts: 5
retry_backoff_ms: 250
"#;
    let config = EngineConfig::from_yaml(yaml).unwrap();
    config.validate_all().unwrap();

    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 6432);
    assert_eq!(config.schema, "events");
    assert_eq!(config.ssl_mode, SslMode::VerifyFull);
    assert_eq!(config.effective_policy(), CommitPolicy::PerRecord);
    assert_eq!(config.retry_backoff(), Duration::from_millis(250));

    let conn = config.connection_config();
    assert_eq!(conn.port, 6432);
    assert_eq!(conn.user, "writer");
    assert_eq!(
        conn.password.as_ref().map(|p| p.expose_secret()),
        Some("s3cret")
    );
}

#[test]
fn test_json_config_defaults() {
    let config = EngineConfig::from_json(r#"{"database": "app", "table": "users"}"#).unwrap();
    config.validate_all().unwrap();

    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.schema, "public");
    assert_eq!(config.ssl_mode, SslMode::Prefer);
    assert_eq!(config.commit_policy, CommitPolicy::PerBatch);
    assert!(!config.bulk);
    assert_eq!(config.concurrency_limit, 100);
    assert_eq!(config.max_retry_attempts, 3);
    assert!(config.introspect_schema);
}

#[test]
fn test_password_never_printed() {
    let mut config = EngineConfig::new("app", "users");
    config.password = Some(SensitiveString::new("hunter2"));

    assert!(!format!("{:?}", config).contains("hunter2"));
    assert!(!format!("{:?}", config.connection_config()).contains("hunter2"));
    assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
}

#[test]
fn test_bulk_flag() {
    let mut config = EngineConfig::new("app", "users");
    config.bulk = true;
    assert!(config.validate_all().is_ok());
    assert_eq!(config.effective_policy(), CommitPolicy::BulkSingle);

    config.commit_policy = CommitPolicy::PerRecord;
    let err = config.validate_all().unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_invalid_identifiers_rejected() {
    let config = EngineConfig::new("app", "users; DROP TABLE x");
    assert!(matches!(
        config.validate_all(),
        Err(Error::InvalidIdentifier { .. })
    ));

    let mut config = EngineConfig::new("app", "users");
    config.schema = "public.x".into();
    assert!(matches!(
        config.validate_all(),
        Err(Error::InvalidIdentifier { .. })
    ));
}

#[test]
fn test_out_of_range_values_rejected() {
    let mut config = EngineConfig::new("app", "users");
    config.concurrency_limit = 0;
    assert!(matches!(
        config.validate_all(),
        Err(Error::Configuration { .. })
    ));

    let mut config = EngineConfig::new("app", "users");
    config.max_retry_attempts = 0;
    assert!(config.validate_all().is_err());

    let config = EngineConfig::new("", "users");
    assert!(config.validate_all().is_err());
}

#[test]
fn test_unknown_ssl_mode_rejected() {
    let err = EngineConfig::from_yaml("database: app\ntable: t\nssl_mode: sometimes\n").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
