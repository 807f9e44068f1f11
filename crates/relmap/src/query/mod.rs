//! Relation-aware queries.
//!
//! [`Query`] is the generic part shared by entity queries, filters and eager
//! load callbacks: a statement plus eager-load paths and soft-delete toggles.
//! [`EntityQuery`] binds it to an entity mapper and materializes records.

mod entity_query;

pub use entity_query::{EntityQuery, NamedFilter, QueryScope};

use relmap_core::Value;
use relmap_query::{Expr, Join, OrderBy, OrderDirection, QueryStatement};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Customizes a relation query; used by eager-load paths and relation hooks.
pub type QueryCallback = Rc<dyn Fn(&mut Query)>;

/// One eager-load declaration.
#[derive(Clone)]
pub enum With {
    /// `"posts"` or a dotted path `"posts.comments"`.
    Path(String),
    /// A path whose final query is customized by a callback.
    Callback(String, QueryCallback),
}

impl With {
    pub fn path(path: impl Into<String>) -> Self {
        With::Path(path.into())
    }

    pub fn callback<F>(path: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Query) + 'static,
    {
        With::Callback(path.into(), Rc::new(callback))
    }

    pub fn path_str(&self) -> &str {
        match self {
            With::Path(path) | With::Callback(path, _) => path,
        }
    }

    pub fn query_callback(&self) -> Option<&QueryCallback> {
        match self {
            With::Path(_) => None,
            With::Callback(_, callback) => Some(callback),
        }
    }

    fn with_path(&self, path: String) -> Self {
        match self {
            With::Path(_) => With::Path(path),
            With::Callback(_, callback) => With::Callback(path, Rc::clone(callback)),
        }
    }
}

impl From<&str> for With {
    fn from(path: &str) -> Self {
        With::Path(path.to_string())
    }
}

impl From<String> for With {
    fn from(path: String) -> Self {
        With::Path(path)
    }
}

impl fmt::Debug for With {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            With::Path(path) => f.debug_tuple("Path").field(path).finish(),
            With::Callback(path, _) => f.debug_tuple("Callback").field(path).finish(),
        }
    }
}

/// Eager-load declarations grouped by top-level relation.
#[derive(Default, Clone)]
pub struct WithAttributes {
    /// Top-level relations in declaration order, with their callback.
    pub with: Vec<(String, Option<QueryCallback>)>,
    /// Nested paths below each top-level relation.
    pub extra: HashMap<String, Vec<With>>,
}

impl fmt::Debug for WithAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let with: Vec<_> = self
            .with
            .iter()
            .map(|(name, callback)| (name, callback.is_some()))
            .collect();
        f.debug_struct("WithAttributes")
            .field("with", &with)
            .field("extra", &self.extra)
            .finish()
    }
}

impl WithAttributes {
    /// Group dotted paths by their head.
    ///
    /// A bare name with a callback replaces an earlier placeholder; nested
    /// tails are deduplicated and a callback-bearing tail replaces a plain one.
    pub fn resolve(items: &[With]) -> Self {
        let mut attributes = WithAttributes::default();

        for item in items {
            let callback = item.query_callback().cloned();
            match item.path_str().split_once('.') {
                None => {
                    let name = item.path_str();
                    match attributes.with.iter().position(|(n, _)| n == name) {
                        Some(index) => {
                            if callback.is_some() {
                                attributes.with[index].1 = callback;
                            }
                        }
                        None => attributes.with.push((name.to_string(), callback)),
                    }
                    attributes.extra.entry(name.to_string()).or_default();
                }
                Some((head, tail)) => {
                    if !attributes.with.iter().any(|(n, _)| n == head) {
                        attributes.with.push((head.to_string(), None));
                    }
                    let nested = attributes.extra.entry(head.to_string()).or_default();
                    match nested.iter().position(|w| w.path_str() == tail) {
                        Some(index) => {
                            if callback.is_some() && nested[index].query_callback().is_none() {
                                nested[index] = item.with_path(tail.to_string());
                            }
                        }
                        None => nested.push(item.with_path(tail.to_string())),
                    }
                }
            }
        }

        attributes
    }

    pub fn nested(&self, name: &str) -> Vec<With> {
        self.extra.get(name).cloned().unwrap_or_default()
    }
}

/// Statement plus eager-load and soft-delete settings.
#[derive(Clone, Default)]
pub struct Query {
    pub(crate) statement: QueryStatement,
    pub(crate) with: Vec<With>,
    pub(crate) immediate: bool,
    pub(crate) with_soft_deleted: bool,
    pub(crate) only_soft_deleted: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statement(&self) -> &QueryStatement {
        &self.statement
    }

    pub fn statement_mut(&mut self) -> &mut QueryStatement {
        &mut self.statement
    }

    pub fn with_items(&self) -> &[With] {
        &self.with
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn with_attributes(&self) -> WithAttributes {
        WithAttributes::resolve(&self.with)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("statement", &self.statement)
            .field("with", &self.with)
            .field("immediate", &self.immediate)
            .field("with_soft_deleted", &self.with_soft_deleted)
            .field("only_soft_deleted", &self.only_soft_deleted)
            .finish()
    }
}

/// Fluent modifiers shared by [`Query`] and [`EntityQuery`].
pub trait QueryBuilder {
    fn query_mut(&mut self) -> &mut Query;

    /// AND a predicate.
    fn where_(&mut self, expr: Expr) -> &mut Self {
        self.query_mut().statement.filter(expr);
        self
    }

    /// OR a predicate.
    fn or_where(&mut self, expr: Expr) -> &mut Self {
        self.query_mut().statement.or_filter(expr);
        self
    }

    fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.where_(Expr::col(column).eq(value.into()))
    }

    fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_(Expr::col(column).in_list(values))
    }

    fn where_null(&mut self, column: &str) -> &mut Self {
        self.where_(Expr::col(column).is_null())
    }

    fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.where_(Expr::col(column).is_not_null())
    }

    fn join(&mut self, join: Join) -> &mut Self {
        self.query_mut().statement.join(join);
        self
    }

    fn group_by<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_mut().statement.group_by(columns);
        self
    }

    fn having(&mut self, expr: Expr) -> &mut Self {
        self.query_mut().statement.having(expr);
        self
    }

    fn or_having(&mut self, expr: Expr) -> &mut Self {
        self.query_mut().statement.or_having(expr);
        self
    }

    fn order_by<I, S>(&mut self, columns: I, direction: OrderDirection) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statement = &mut self.query_mut().statement;
        for column in columns {
            statement.order_by(OrderBy::new(column, direction));
        }
        self
    }

    fn limit(&mut self, limit: u64) -> &mut Self {
        self.query_mut().statement.limit(limit);
        self
    }

    fn offset(&mut self, offset: u64) -> &mut Self {
        self.query_mut().statement.offset(offset);
        self
    }

    fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.query_mut().statement.distinct(distinct);
        self
    }

    /// Replace the eager-load declarations.
    fn with<I, W>(&mut self, items: I, immediate: bool) -> &mut Self
    where
        I: IntoIterator<Item = W>,
        W: Into<With>,
    {
        let query = self.query_mut();
        query.with = items.into_iter().map(Into::into).collect();
        query.immediate = immediate;
        self
    }

    /// Include soft-deleted rows.
    fn with_deleted(&mut self, value: bool) -> &mut Self {
        self.query_mut().with_soft_deleted = value;
        self
    }

    /// Return only soft-deleted rows.
    fn only_deleted(&mut self) -> &mut Self {
        let query = self.query_mut();
        query.with_soft_deleted = true;
        query.only_soft_deleted = true;
        self
    }
}

impl QueryBuilder for Query {
    fn query_mut(&mut self) -> &mut Query {
        self
    }
}
