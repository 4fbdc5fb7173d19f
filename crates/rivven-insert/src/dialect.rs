//! SQL dialect abstraction for rivven-insert
//!
//! The engine only ever emits two statements: a parameterized INSERT and a
//! parameterized column listing. Dialects differ in how they spell
//! positional placeholders.

use crate::connection::DatabaseType;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Get the placeholder for the 1-based parameter `index` (e.g., $1, ?)
    fn placeholder(&self, index: usize) -> String;

    /// Column listing for a table. Binds two parameters: schema, then table.
    fn list_columns_sql(&self) -> String {
        format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} \
             ORDER BY ordinal_position",
            self.placeholder(1),
            self.placeholder(2)
        )
    }
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    // information_schema columns are `sql_identifier` domains; cast so the
    // driver sees plain text on both sides.
    fn list_columns_sql(&self) -> String {
        "SELECT column_name::text AS column_name FROM information_schema.columns \
         WHERE table_schema::text = $1 AND table_name::text = $2 \
         ORDER BY ordinal_position"
            .to_string()
    }
}

/// MySQL / MariaDB and other `?`-style drivers
#[derive(Debug, Clone, Default)]
pub struct GenericDialect;

impl SqlDialect for GenericDialect {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

/// Get dialect for a database type
pub fn dialect_for(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::MySQL | DatabaseType::Unknown => Box::new(GenericDialect),
    }
}
