//! INSERT statement construction
//!
//! Table and column names are interpolated into the statement text only after
//! they pass [`validate_sql_identifier`] (and the introspected [`ColumnSet`],
//! when populated). Values are never interpolated: every value becomes one
//! positional placeholder plus one bound parameter, in column order.
//!
//! ```
//! use rivven_insert::query::QueryBuilder;
//! use rivven_insert::types::{Record, Value};
//!
//! let builder = QueryBuilder::new("t").unwrap();
//! let stmt = builder.build_insert(&Record::new().with("a", "x")).unwrap();
//!
//! assert_eq!(stmt.sql, "INSERT INTO t (a) VALUES ($1)");
//! assert_eq!(stmt.params, vec![Value::String("x".into())]);
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{Error, Result};
use crate::schema::ColumnSet;
use crate::security::validate_sql_identifier;
use crate::types::{Record, Value};

/// A built statement: SQL text plus its bound parameters
#[derive(Clone, PartialEq)]
pub struct InsertStatement {
    /// Statement text with positional placeholders
    pub sql: String,
    /// Parameters, one per placeholder
    pub params: Vec<Value>,
}

impl InsertStatement {
    /// Number of row groups in the VALUES clause
    pub fn row_count(&self, column_count: usize) -> usize {
        if column_count == 0 {
            0
        } else {
            self.params.len() / column_count
        }
    }
}

// Bound values stay out of Debug output.
impl std::fmt::Debug for InsertStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertStatement")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

/// Check that every record carries the first record's columns, in the same order
pub fn check_uniform(records: &[Record]) -> Result<()> {
    let Some(first) = records.first() else {
        return Err(Error::EmptyBatch);
    };
    match records
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, r)| !r.same_columns(first))
    {
        Some((index, _)) => Err(Error::MismatchedColumns { index }),
        None => Ok(()),
    }
}

/// Builds INSERT statements for one target table
#[derive(Clone)]
pub struct QueryBuilder {
    table: String,
    schema: Option<String>,
    dialect: Arc<dyn SqlDialect>,
    columns: ColumnSet,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("dialect", &self.dialect.name())
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl QueryBuilder {
    /// Create a builder for `table` using PostgreSQL placeholders.
    ///
    /// Fails if `table` is not a valid identifier.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_sql_identifier(&table)?;
        Ok(Self {
            table,
            schema: None,
            dialect: Arc::new(PostgresDialect),
            columns: ColumnSet::empty(),
        })
    }

    /// Qualify the table with a schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_sql_identifier(&schema)?;
        self.schema = Some(schema);
        Ok(self)
    }

    /// Use a different placeholder dialect
    pub fn with_dialect(mut self, dialect: Arc<dyn SqlDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Restrict record keys to an introspected column set
    pub fn with_columns(mut self, columns: ColumnSet) -> Self {
        self.columns = columns;
        self
    }

    /// Target table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column set in use (empty when introspection was skipped)
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Table name as written into statements
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.table),
            None => self.table.clone(),
        }
    }

    fn validate_column(&self, column: &str) -> Result<()> {
        validate_sql_identifier(column)?;
        if !self.columns.is_empty() && !self.columns.contains(column) {
            return Err(Error::unknown_column(&self.table, column));
        }
        Ok(())
    }

    fn validate_columns(&self, record: &Record) -> Result<()> {
        if record.is_empty() {
            return Err(Error::EmptyRecord);
        }
        record.columns().try_for_each(|c| self.validate_column(c))
    }

    fn values_group(&self, first_index: usize, width: usize) -> String {
        let placeholders: Vec<String> = (first_index..first_index + width)
            .map(|i| self.dialect.placeholder(i))
            .collect();
        format!("({})", placeholders.join(", "))
    }

    /// Build a single-row INSERT for `record`
    pub fn build_insert(&self, record: &Record) -> Result<InsertStatement> {
        self.validate_columns(record)?;

        let columns: Vec<&str> = record.columns().collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualified_table(),
            columns.join(", "),
            self.values_group(1, columns.len())
        );
        let params: Vec<Value> = record.values().cloned().collect();

        debug!(
            table = %self.table,
            columns = columns.len(),
            "Built INSERT"
        );

        Ok(InsertStatement { sql, params })
    }

    /// Build one multi-row INSERT covering every record.
    ///
    /// Columns are validated once, against the first record. All records must
    /// share that record's column layout.
    pub fn build_bulk_insert(&self, records: &[Record]) -> Result<InsertStatement> {
        let first = records.first().ok_or(Error::EmptyBatch)?;
        self.validate_columns(first)?;
        check_uniform(records)?;

        let columns: Vec<&str> = first.columns().collect();
        let width = columns.len();
        let groups: Vec<String> = (0..records.len())
            .map(|row| self.values_group(row * width + 1, width))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualified_table(),
            columns.join(", "),
            groups.join(", ")
        );
        let params: Vec<Value> = records
            .iter()
            .flat_map(|r| r.values().cloned())
            .collect();

        debug!(
            table = %self.table,
            columns = width,
            rows = records.len(),
            "Built bulk INSERT"
        );

        Ok(InsertStatement { sql, params })
    }
}
