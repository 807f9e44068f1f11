//! INSERT statements, UPDATE assignments and aggregate functions.

use relmap_core::{ColumnMap, Dialect, Value};

/// INSERT statement for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table: String,
    values: ColumnMap,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>, values: ColumnMap) -> Self {
        Self {
            table: table.into(),
            values,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Build the INSERT SQL and parameters.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let columns: Vec<_> = self
            .values
            .keys()
            .map(|name| dialect.quote_identifier(name))
            .collect();
        let params: Vec<Value> = self.values.values().cloned().collect();
        let placeholders: Vec<_> = (1..=params.len())
            .map(|i| dialect.placeholder(i))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_identifier(&self.table),
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, params)
    }
}

/// One `SET` entry of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `col = value`
    Set(Value),
    /// `col = col + n`
    Increment(Value),
    /// `col = col - n`
    Decrement(Value),
}

impl Assignment {
    pub(crate) fn build(&self, column: &str, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let quoted = dialect.quote_identifier(column);
        let (op, value) = match self {
            Assignment::Set(value) => {
                params.push(value.clone());
                return format!("{quoted} = {}", dialect.placeholder(params.len()));
            }
            Assignment::Increment(value) => ("+", value),
            Assignment::Decrement(value) => ("-", value),
        };
        params.push(value.clone());
        format!(
            "{quoted} = {quoted} {op} {}",
            dialect.placeholder(params.len())
        )
    }
}

/// Aggregate functions usable through the scalar-query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Avg => "AVG",
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}
