//! Column-set introspection for the target table
//!
//! The column set is read once from `information_schema.columns` when the
//! engine is configured. While populated, every record key must name one of
//! these columns.

use indexmap::IndexSet;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::Value;

/// Legal column names of the target table.
///
/// Catalog names are stored as reported. Record keys are written unquoted, so
/// the server folds them to lower case: `Name` addresses the column `name`,
/// and a quoted mixed-case column such as `"userId"` cannot be addressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    columns: IndexSet<String>,
}

impl ColumnSet {
    /// An empty set; only identifier syntax is checked
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the unquoted key `column` resolves to a known column
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(&column.to_ascii_lowercase())
    }

    /// Whether introspection populated this set
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of columns
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Column names in ordinal order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|c| c.as_ref().to_string())
                .collect(),
        }
    }
}

/// Load the column set of `schema.table`.
///
/// A table without visible columns is reported as [`Error::TableNotFound`].
pub async fn load_columns(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    schema: &str,
    table: &str,
) -> Result<ColumnSet> {
    let sql = dialect.list_columns_sql();
    let rows = conn
        .query(
            &sql,
            &[
                Value::String(schema.to_string()),
                Value::String(table.to_string()),
            ],
        )
        .await
        .map_err(|e| {
            if e.is_connection_lost() {
                e
            } else {
                Error::config(format!(
                    "failed to load columns of {}.{}: {}",
                    schema, table, e
                ))
            }
        })?;

    let columns: ColumnSet = rows
        .iter()
        .filter_map(|r| {
            r.get_by_name("column_name")
                .and_then(|v| v.as_str().map(String::from))
        })
        .collect();

    if columns.is_empty() {
        return Err(Error::TableNotFound {
            table: format!("{}.{}", schema, table),
        });
    }

    debug!(schema, table, columns = ?columns.iter().collect::<Vec<_>>(), "Loaded column set");
    info!(schema, table, count = columns.len(), "Schema introspection complete");

    Ok(columns)
}
