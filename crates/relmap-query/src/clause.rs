//! SQL clause types (WHERE, ORDER BY, LIMIT, etc.)

use crate::expr::Expr;
use relmap_core::{Dialect, Value};
use std::str::FromStr;

/// WHERE / HAVING clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    expr: Expr,
}

impl Where {
    /// Create a new WHERE clause with the given expression.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// Add an AND condition.
    pub fn and(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.and(expr),
        }
    }

    /// Add an OR condition.
    pub fn or(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.or(expr),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Build the clause body, appending its parameters.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        self.expr.build(dialect, params)
    }
}

/// Combine an optional clause with a new condition.
pub(crate) fn and_where(clause: Option<Where>, expr: Expr) -> Where {
    match clause {
        Some(existing) => existing.and(expr),
        None => Where::new(expr),
    }
}

pub(crate) fn or_where(clause: Option<Where>, expr: Expr) -> Where {
    match clause {
        Some(existing) => existing.or(expr),
        None => Where::new(expr),
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    column: String,
    direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

impl FromStr for OrderDirection {
    type Err = relmap_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            other => Err(relmap_core::Error::config(format!(
                "Invalid order direction [{other}]"
            ))),
        }
    }
}

impl OrderBy {
    /// Create an order by clause with an explicit direction.
    pub fn new(column: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, OrderDirection::Asc)
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, OrderDirection::Desc)
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub const fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// Generate SQL for this ORDER BY clause.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut params = Vec::new();
        let column = Expr::col(self.column.clone()).build(dialect, &mut params);
        format!("{} {}", column, self.direction.as_str())
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(pub u64);
