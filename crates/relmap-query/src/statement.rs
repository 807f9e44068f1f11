//! The shared statement behind SELECT, UPDATE, DELETE and aggregate queries.
//!
//! A `QueryStatement` accumulates tables, columns, joins and clauses through a
//! `&mut self` fluent API and compiles to SQL plus positional parameters for a
//! given dialect. The same statement can be compiled more than once.

use crate::builder::{Aggregate, Assignment};
use crate::clause::{Limit, Offset, OrderBy, Where, and_where, or_where};
use crate::expr::Expr;
use crate::join::Join;
use relmap_core::{Dialect, Value};

/// A selected column with an optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectColumn {
    fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let sql = self.expr.build(dialect, params);
        match &self.alias {
            Some(alias) => format!("{sql} AS {}", dialect.quote_identifier(alias)),
            None => sql,
        }
    }
}

/// Fluent SQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStatement {
    tables: Vec<String>,
    columns: Vec<SelectColumn>,
    joins: Vec<Join>,
    where_clause: Option<Where>,
    group_by: Vec<String>,
    having: Option<Where>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
    distinct: bool,
}

impl QueryStatement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the FROM list.
    pub fn from(&mut self, table: impl Into<String>) -> &mut Self {
        self.tables.push(table.into());
        self
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Select a column (`"name"`, `"t.name"`, `"*"` or `"t.*"`).
    pub fn column(&mut self, name: impl Into<String>) -> &mut Self {
        self.columns.push(SelectColumn {
            expr: Expr::col(name),
            alias: None,
        });
        self
    }

    /// Select a column under an alias.
    pub fn column_as(&mut self, name: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.columns.push(SelectColumn {
            expr: Expr::col(name),
            alias: Some(alias.into()),
        });
        self
    }

    /// Select an arbitrary expression.
    pub fn select_expr(&mut self, expr: Expr, alias: Option<String>) -> &mut Self {
        self.columns.push(SelectColumn { expr, alias });
        self
    }

    pub fn columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Is `name` already selected without an alias?
    pub fn selects(&self, name: &str) -> bool {
        let wanted = Expr::col(name);
        self.columns
            .iter()
            .any(|c| c.alias.is_none() && c.expr == wanted)
    }

    /// Add a JOIN clause.
    pub fn join(&mut self, join: Join) -> &mut Self {
        self.joins.push(join);
        self
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Add a WHERE condition, AND-ed with existing ones.
    pub fn filter(&mut self, expr: Expr) -> &mut Self {
        self.where_clause = Some(and_where(self.where_clause.take(), expr));
        self
    }

    /// Add an OR WHERE condition.
    pub fn or_filter(&mut self, expr: Expr) -> &mut Self {
        self.where_clause = Some(or_where(self.where_clause.take(), expr));
        self
    }

    pub fn where_clause(&self) -> Option<&Where> {
        self.where_clause.as_ref()
    }

    /// Add GROUP BY columns.
    pub fn group_by<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add a HAVING condition, AND-ed with existing ones.
    pub fn having(&mut self, expr: Expr) -> &mut Self {
        self.having = Some(and_where(self.having.take(), expr));
        self
    }

    /// Add an OR HAVING condition.
    pub fn or_having(&mut self, expr: Expr) -> &mut Self {
        self.having = Some(or_where(self.having.take(), expr));
        self
    }

    /// Add ORDER BY clause.
    pub fn order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    /// Set LIMIT.
    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = Some(Limit(n));
        self
    }

    /// Set OFFSET.
    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Make this a DISTINCT query.
    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    fn from_sql(&self, dialect: Dialect) -> String {
        self.tables
            .iter()
            .map(|t| dialect.quote_identifier(t))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Append joins, WHERE, GROUP BY and HAVING.
    fn build_filters(&self, dialect: Dialect, sql: &mut String, params: &mut Vec<Value>) {
        for join in &self.joins {
            sql.push_str(&join.build(dialect, params));
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, params));
        }

        if !self.group_by.is_empty() {
            let mut ignored = Vec::new();
            let cols: Vec<_> = self
                .group_by
                .iter()
                .map(|c| Expr::col(c.clone()).build(dialect, &mut ignored))
                .collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }

        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.build(dialect, params));
        }
    }

    fn build_tail(&self, dialect: Dialect, sql: &mut String) {
        if !self.order_by.is_empty() {
            let orders: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }
    }

    /// Build the SELECT SQL and parameters.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn to_select_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<_> = self
                .columns
                .iter()
                .map(|c| c.build(dialect, &mut params))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.from_sql(dialect));
        self.build_filters(dialect, &mut sql, &mut params);
        self.build_tail(dialect, &mut sql);

        (sql, params)
    }

    /// Build a scalar aggregate query (`SELECT COUNT(col) FROM ...`).
    ///
    /// Selected columns, ORDER BY, LIMIT and OFFSET are ignored.
    pub fn to_aggregate_sql(
        &self,
        dialect: Dialect,
        function: Aggregate,
        column: &str,
        distinct: bool,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut ignored = Vec::new();
        let target = Expr::col(column).build(dialect, &mut ignored);
        let distinct_str = if distinct { "DISTINCT " } else { "" };

        let mut sql = format!(
            "SELECT {}({distinct_str}{target}) FROM {}",
            function.as_str(),
            self.from_sql(dialect)
        );
        self.build_filters(dialect, &mut sql, &mut params);
        (sql, params)
    }

    /// Build an UPDATE of `table` with the statement's joins and WHERE clause.
    pub fn to_update_sql(
        &self,
        dialect: Dialect,
        table: &str,
        assignments: &[(String, Assignment)],
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("UPDATE {}", dialect.quote_identifier(table));
        for join in &self.joins {
            sql.push_str(&join.build(dialect, &mut params));
        }

        let sets: Vec<_> = assignments
            .iter()
            .map(|(column, assignment)| assignment.build(column, dialect, &mut params))
            .collect();
        sql.push_str(" SET ");
        sql.push_str(&sets.join(", "));

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }

        (sql, params)
    }

    /// Build a DELETE from `table` with the statement's joins and WHERE clause.
    ///
    /// A non-empty `tables` list names the tables rows are removed from when
    /// joins are present (`DELETE a, b FROM ...`).
    pub fn to_delete_sql(
        &self,
        dialect: Dialect,
        table: &str,
        tables: &[String],
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = String::from("DELETE ");
        if !tables.is_empty() {
            let targets: Vec<_> = tables.iter().map(|t| dialect.quote_identifier(t)).collect();
            sql.push_str(&targets.join(", "));
            sql.push(' ');
        }
        sql.push_str("FROM ");
        sql.push_str(&dialect.quote_identifier(table));

        for join in &self.joins {
            sql.push_str(&join.build(dialect, &mut params));
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }

        (sql, params)
    }
}
