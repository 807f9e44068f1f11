//! JOIN clauses.

use crate::expr::Expr;
use relmap_core::{Dialect, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// `<kind> JOIN <table> ON <condition>`.
///
/// Pivot-table loading is the main user; any query with a join yields
/// read-only records.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub on: Expr,
}

impl Join {
    pub fn new(join_type: JoinType, table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type,
            table: table.into(),
            on,
        }
    }

    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Inner, table, on)
    }

    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Left, table, on)
    }

    /// Render with a leading space, appending bound values to `params`.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let table = dialect.quote_identifier(&self.table);
        let on = self.on.build(dialect, params);
        format!(" {} {table} ON {on}", self.join_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pivot_join() {
        let join = Join::inner(
            "roles",
            Expr::qualified("roles_users", "role_id").eq(Expr::qualified("roles", "id")),
        );
        let mut params = Vec::new();
        assert_eq!(
            join.build(Dialect::Postgres, &mut params),
            " INNER JOIN \"roles\" ON \"roles_users\".\"role_id\" = \"roles\".\"id\""
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_left_join_binds_params() {
        let join = Join::left(
            "posts",
            Expr::qualified("posts", "user_id")
                .eq(Expr::qualified("users", "id"))
                .and(Expr::col("published").eq(true)),
        );
        let mut params = Vec::new();
        assert_eq!(
            join.build(Dialect::Sqlite, &mut params),
            " LEFT JOIN \"posts\" ON \"posts\".\"user_id\" = \"users\".\"id\" AND \"published\" = ?1"
        );
        assert_eq!(params, [Value::Bool(true)]);
    }
}
