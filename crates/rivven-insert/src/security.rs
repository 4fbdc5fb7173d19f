//! Identifier validation for SQL injection prevention.
//!
//! Table and column names cannot be sent as bound parameters, so anything that
//! is interpolated into statement text must be restricted to the unquoted SQL
//! identifier grammar instead: `^[A-Za-z_][A-Za-z0-9_]*$`.
//!
//! Values never go through this module. They are always bound parameters.

use crate::error::Error;

/// Validate a SQL identifier (table, schema or column name).
///
/// Rules:
/// - Must not be empty
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use rivven_insert::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("my_table_123").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// // Rejects injection attempts
/// assert!(validate_sql_identifier("x); DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("1bad").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => {
            return Err(Error::invalid_identifier(name, "identifier cannot be empty"));
        }
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(_) => {
            return Err(Error::invalid_identifier(
                name,
                "must start with a letter or underscore",
            ));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::invalid_identifier(
                name,
                format!("contains invalid character {:?}", c),
            ));
        }
    }

    Ok(())
}

/// Whether `name` is a valid SQL identifier.
#[inline]
pub fn is_valid_identifier(name: &str) -> bool {
    validate_sql_identifier(name).is_ok()
}
