//! Database connection trait.
//!
//! This module defines the contract a storage backend implements so the ORM can
//! run statements against it:
//!
//! - [`Connection`] - blocking statement execution, transaction control, generated ids
//! - [`Dialect`] - placeholder and identifier-quoting rules for rendered SQL
//!
//! Everything here is synchronous: one connection serves one unit of work and is
//! never used by two operations at the same time.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Date format used when a backend does not specify one (chrono `strftime` syntax).
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled. A `*` is never quoted.
    pub fn quote_identifier(self, name: &str) -> String {
        if name == "*" {
            return name.to_string();
        }
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }
}

/// A blocking database connection.
///
/// Implementations execute already-rendered SQL with positional parameters.
/// `begin`/`commit`/`rollback` are issued by the ORM's transaction helper, which
/// takes care of nesting; implementations only need flat transactions.
pub trait Connection {
    /// The dialect statements should be rendered in.
    fn dialect(&self) -> Dialect;

    /// Canonical date format of this backend.
    fn date_format(&self) -> &str {
        DEFAULT_DATE_FORMAT
    }

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a scalar query (aggregates) and return its single value.
    fn column(&self, sql: &str, params: &[Value]) -> Result<Value> {
        Ok(self
            .query_one(sql, params)?
            .and_then(|row| row.get(0).cloned())
            .unwrap_or(Value::Null))
    }

    /// The last id generated by an INSERT, optionally for a named sequence.
    fn last_insert_id(&self, sequence: Option<&str>) -> Result<Value>;

    /// Begin a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&self) -> Result<()>;
}
