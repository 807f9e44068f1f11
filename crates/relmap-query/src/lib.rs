//! SQL statement builder for relmap.
//!
//! `relmap-query` is the **statement layer**: a predicate DSL (`Expr`), clause
//! types and a fluent `QueryStatement` that compiles to SQL plus positional
//! parameters for a `Dialect`. The ORM builds its entity queries on top of it and
//! hands the rendered SQL to a `relmap_core::Connection`.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod statement;

pub use builder::{Aggregate, Assignment, InsertStatement};
pub use clause::{Limit, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Expr};
pub use join::{Join, JoinType};
pub use relmap_core::Dialect;
pub use statement::{QueryStatement, SelectColumn};
